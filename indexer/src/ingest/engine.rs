//! The ingestion state machine.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::IngestError;
use crate::ledger::LedgerStore;
use crate::metrics::IngestMetrics;
use crate::pipeline::{BlockFetcher, FetcherConfig};
use crate::protocol::ProtocolEngine;
use crate::source::BlockSource;
use crate::types::{Block, Height};

/// Blocks between progress lines at info level.
const PROGRESS_EVERY: Height = 1_000;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// How long one poll of the fetch buffer may wait.
    pub poll_timeout: Duration,
    /// Consecutive empty polls before switching to the fallback source.
    /// Zero disables the switch.
    pub idle_polls_before_fallback: u32,
    pub fetcher: FetcherConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            idle_polls_before_fallback: 3,
            fetcher: FetcherConfig::default(),
        }
    }
}

/// Result of one [`Ingestor::run`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IngestSummary {
    pub applied: u64,
    pub rolled_back: u64,
    /// Ledger cursor when the loop ended.
    pub cursor: Option<Height>,
}

/// Single-writer ingestion loop over a ledger.
pub struct Ingestor<L> {
    engine: ProtocolEngine,
    ledger: L,
    config: IngestConfig,
    metrics: Option<IngestMetrics>,
}

impl<L: LedgerStore> Ingestor<L> {
    pub fn new(engine: ProtocolEngine, ledger: L, config: IngestConfig) -> Self {
        Self {
            engine,
            ledger,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IngestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }

    fn genesis(&self) -> Height {
        self.engine.params().start_height
    }

    /// Follows `source` until `shutdown` is cancelled or a fatal error occurs.
    ///
    /// Whatever the outcome, the fetcher is stopped and the ledger closed
    /// before this returns.
    pub async fn run<S: BlockSource>(
        &mut self,
        source: S,
        shutdown: CancellationToken,
    ) -> Result<IngestSummary, IngestError> {
        let mut summary = IngestSummary::default();
        let mut fetcher = None;

        let result = self
            .follow(source, &shutdown, &mut fetcher, &mut summary)
            .await;

        if let Some(active) = fetcher.take() {
            let report = active.stop().await;
            if !report.exited_in_time {
                warn!("fetcher was aborted during shutdown");
            }
        }

        let closed = self.ledger.close();
        match (result, closed) {
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    error!(error = %close_err, "failed to close ledger");
                }
                error!(error = %err, cursor = ?summary.cursor, "ingestion stopped");
                Err(err)
            }
            (Ok(()), Err(close_err)) => Err(close_err.into()),
            (Ok(()), Ok(())) => {
                info!(
                    applied = summary.applied,
                    rolled_back = summary.rolled_back,
                    cursor = ?summary.cursor,
                    "ingestion stopped"
                );
                Ok(summary)
            }
        }
    }

    async fn follow<S: BlockSource>(
        &mut self,
        source: S,
        shutdown: &CancellationToken,
        fetcher: &mut Option<BlockFetcher>,
        summary: &mut IngestSummary,
    ) -> Result<(), IngestError> {
        summary.cursor = self.ledger.last_indexed_block()?;
        let start = summary.cursor.map_or(self.genesis(), |h| h + 1);
        info!(cursor = ?summary.cursor, start, source = source.name(), "resuming ingestion");

        let mut fallback = source.fallback();
        *fetcher = Some(self.spawn_fetcher(source, start, shutdown)?);

        let mut idle_polls: u32 = 0;
        while !shutdown.is_cancelled() {
            let Some(active) = fetcher.as_mut() else {
                break;
            };
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                block = active.get_next_block(self.config.poll_timeout) => block,
            };

            let Some(block) = next else {
                let source_name = active.source_name();
                let exhausted = active.is_exhausted() && !shutdown.is_cancelled();
                idle_polls += 1;
                let threshold = self.config.idle_polls_before_fallback;
                let stalled = threshold > 0 && idle_polls >= threshold;
                if !(exhausted || stalled) {
                    continue;
                }
                idle_polls = 0;

                let Some(next_source) = fallback.take() else {
                    if exhausted {
                        return Err(IngestError::FetcherExited { source_name });
                    }
                    continue;
                };
                // Restart on the last applied height so the tip block is
                // re-verified through the reorg path.
                let genesis = self.genesis();
                let restart = summary.cursor.map_or(genesis, |c| c.max(genesis));
                info!(
                    from = source_name,
                    to = next_source.name(),
                    restart,
                    exhausted,
                    "source stalled; switching to fallback"
                );
                if let Some(previous) = fetcher.take() {
                    previous.stop().await;
                }
                fallback = next_source.fallback();
                *fetcher = Some(self.spawn_fetcher(next_source, restart, shutdown)?);
                continue;
            };

            idle_polls = 0;
            self.handle_block(block, summary)?;
        }

        debug!("shutdown requested");
        Ok(())
    }

    fn spawn_fetcher<S: BlockSource>(
        &self,
        source: S,
        start: Height,
        shutdown: &CancellationToken,
    ) -> Result<BlockFetcher, IngestError> {
        Ok(BlockFetcher::spawn(
            source,
            start,
            self.config.fetcher.clone(),
            shutdown,
            self.metrics.clone(),
        )?)
    }

    /// Rolls back as needed, then applies `block`.
    fn handle_block(&mut self, block: Block, summary: &mut IngestSummary) -> Result<(), IngestError> {
        let genesis = self.genesis();
        if block.height < genesis {
            return Err(IngestError::BelowGenesis {
                height: block.height,
                genesis,
            });
        }

        let expected = summary.cursor.map_or(genesis, |h| h + 1);
        if block.height > expected {
            return Err(IngestError::HeightGap {
                expected,
                got: block.height,
            });
        }

        while let Some(cursor) = summary.cursor.filter(|c| *c >= block.height) {
            warn!(cursor, incoming = block.height, "reorg detected; rolling back");
            self.ledger.rollback_block(cursor)?;
            summary.cursor = self.ledger.last_indexed_block()?;
            summary.rolled_back += 1;
            if let Some(metrics) = &self.metrics {
                metrics.blocks_rolled_back.inc();
            }
        }

        let started = Instant::now();
        let applied = self.engine.process_block(&block, &mut self.ledger)?;
        let elapsed = started.elapsed();

        summary.applied += 1;
        summary.cursor = Some(block.height);

        if let Some(metrics) = &self.metrics {
            metrics.blocks_applied.inc();
            metrics.block_apply_seconds.observe(elapsed.as_secs_f64());
            metrics.rewards_minted.inc_by(applied.total_reward);
            metrics.last_indexed_height.set(block.height as i64);
        }

        if block.height % PROGRESS_EVERY == 0 {
            info!(height = block.height, hash = %block.block_hash, "indexed");
        } else {
            debug!(
                height = block.height,
                txs = block.transactions.len(),
                rewards = applied.rewards.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "block applied"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerReader, StorageError};
    use crate::protocol::ProtocolParams;
    use crate::source::mock::MockSource;
    use crate::storage::{InMemoryLedger, RocksLedgerConfig, ShardedRocksLedger};
    use crate::types::{BlockHash, Hash256, OutPoint, Transaction, TxId, UtxoId, Vin, Vout};
    use tempfile::TempDir;

    fn params(start_height: Height) -> ProtocolParams {
        ProtocolParams {
            min_zero_count: 2,
            max_reward: 1_000,
            unit: 100_000_000,
            start_height,
        }
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            poll_timeout: Duration::from_millis(40),
            idle_polls_before_fallback: 2,
            fetcher: FetcherConfig {
                buffer_capacity: 4,
                throttle_at: 3,
                batch_size: 4,
                enqueue_attempts: 2,
                enqueue_timeout: Duration::from_millis(10),
                tip_poll_interval: Duration::from_millis(20),
                tip_error_backoff: Duration::from_millis(5),
                fetch_error_backoff: Duration::from_millis(5),
                throttle_interval: Duration::from_millis(5),
                stop_grace: Duration::from_secs(1),
            },
        }
    }

    fn tx_id(zeros: usize, height: Height, salt: u8) -> TxId {
        let display = format!(
            "{}f{}{:016x}{:02x}",
            "0".repeat(zeros),
            "a".repeat(45 - zeros),
            height,
            salt
        );
        display.parse().expect("valid display hex")
    }

    /// Block whose only transaction spends the previous block's nice output
    /// and earns a reward of its own.
    fn block(height: Height, salt: u8) -> Block {
        child(height, salt, salt)
    }

    /// Like [`block`], spending the output of a parent built with `parent_salt`.
    fn child(height: Height, parent_salt: u8, salt: u8) -> Block {
        let id = tx_id(3, height, salt);
        let prev = tx_id(3, height.wrapping_sub(1), parent_salt);
        let tx = Transaction::new(
            id,
            vec![Vin::spend(OutPoint::new(prev, 0))],
            vec![Vout::new(&id, 0, 10, false)],
        );
        let mut hash = [salt; 32];
        hash[..8].copy_from_slice(&height.to_le_bytes());
        Block::new(height, BlockHash(Hash256(hash)), vec![tx])
    }

    fn chain(range: std::ops::RangeInclusive<Height>, salt: u8) -> Vec<Block> {
        range.map(|h| block(h, salt)).collect()
    }

    /// Block with a nice transaction splitting its value over two outputs
    /// and a plain transaction moving the second one along.
    fn busy_block(height: Height) -> Block {
        let nice = tx_id(3, height, 7);
        let plain = tx_id(0, height, 7);
        let prev_nice = tx_id(3, height.wrapping_sub(1), 7);
        let prev_plain = tx_id(0, height.wrapping_sub(1), 7);
        let txs = vec![
            Transaction::new(
                nice,
                vec![
                    Vin::spend(OutPoint::new(prev_nice, 0)),
                    Vin::spend(OutPoint::new(prev_plain, 0)),
                ],
                vec![
                    Vout::new(&nice, 0, 10, false),
                    Vout::new(&nice, 1, 30, false),
                    Vout::new(&nice, 2, 5, false),
                ],
            ),
            Transaction::new(
                plain,
                vec![Vin::spend(OutPoint::new(nice, 1))],
                vec![Vout::new(&plain, 0, 7, false), Vout::new(&plain, 1, 1, false)],
            ),
        ];
        let mut hash = [7; 32];
        hash[..8].copy_from_slice(&height.to_le_bytes());
        Block::new(height, BlockHash(Hash256(hash)), txs)
    }

    fn rocks_ingestor(path: &std::path::Path) -> Ingestor<ShardedRocksLedger> {
        let ledger = ShardedRocksLedger::open(&RocksLedgerConfig {
            path: path.to_path_buf(),
            shard_count: 3,
            reorg_window: 8,
            sync_writes: false,
            create_if_missing: true,
        })
        .unwrap();
        Ingestor::new(ProtocolEngine::new(params(0)), ledger, fast_config())
    }

    fn ingestor(start_height: Height) -> Ingestor<InMemoryLedger> {
        let ledger = InMemoryLedger::new(4, 16).unwrap();
        Ingestor::new(ProtocolEngine::new(params(start_height)), ledger, fast_config())
    }

    async fn run_for<L: LedgerStore>(
        ingestor: &mut Ingestor<L>,
        source: MockSource,
        duration: Duration,
    ) -> Result<IngestSummary, IngestError> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trigger.cancel();
        });
        ingestor.run(source, shutdown).await
    }

    #[tokio::test]
    async fn applies_chain_from_genesis_and_closes_ledger() {
        let mut ingestor = ingestor(10);
        let source = MockSource::new(chain(0..=15, 1));

        let summary = run_for(&mut ingestor, source, Duration::from_millis(400))
            .await
            .unwrap();

        assert_eq!(summary.applied, 6);
        assert_eq!(summary.rolled_back, 0);
        assert_eq!(summary.cursor, Some(15));

        let ledger = ingestor.ledger();
        let stats = ledger.stats().unwrap();
        assert_eq!(stats.supply, 6_000);
        assert_eq!(ledger.total_balance(), stats.supply);
        assert_eq!(ledger.block_hash(15), Some(block(15, 1).block_hash));

        // The whole supply moved forward onto the newest output.
        let tip_output = OutPoint::new(tx_id(3, 15, 1), 0).utxo_id();
        assert_eq!(ledger.balance(&tip_output).unwrap(), 6_000);
    }

    #[test]
    fn lower_height_rolls_back_until_the_block_fits() {
        let mut ingestor = ingestor(0);
        let mut summary = IngestSummary::default();

        for b in chain(0..=51, 1) {
            ingestor.handle_block(b, &mut summary).unwrap();
        }
        assert_eq!(summary.cursor, Some(51));

        ingestor.handle_block(block(50, 2), &mut summary).unwrap();
        assert_eq!(summary.rolled_back, 2);
        assert_eq!(summary.cursor, Some(50));
        assert_eq!(ingestor.ledger().block_hash(50), Some(block(50, 2).block_hash));
        assert_eq!(ingestor.ledger().block_hash(51), None);

        let ledger = ingestor.ledger();
        assert_eq!(ledger.total_balance(), ledger.stats().unwrap().supply);
    }

    #[test]
    fn gaps_and_pre_genesis_blocks_are_fatal() {
        let mut ingestor = ingestor(100);
        let mut summary = IngestSummary::default();

        assert!(matches!(
            ingestor.handle_block(block(99, 1), &mut summary),
            Err(IngestError::BelowGenesis {
                height: 99,
                genesis: 100
            })
        ));
        assert!(matches!(
            ingestor.handle_block(block(101, 1), &mut summary),
            Err(IngestError::HeightGap {
                expected: 100,
                got: 101
            })
        ));

        ingestor.handle_block(block(100, 1), &mut summary).unwrap();
        assert!(matches!(
            ingestor.handle_block(block(102, 1), &mut summary),
            Err(IngestError::HeightGap {
                expected: 101,
                got: 102
            })
        ));
    }

    #[test]
    fn reorg_deeper_than_the_window_is_fatal() {
        let ledger = InMemoryLedger::new(1, 2).unwrap();
        let mut ingestor = Ingestor::new(ProtocolEngine::new(params(0)), ledger, fast_config());
        let mut summary = IngestSummary::default();
        for b in chain(0..=5, 1) {
            ingestor.handle_block(b, &mut summary).unwrap();
        }

        assert!(matches!(
            ingestor.handle_block(block(2, 2), &mut summary),
            Err(IngestError::Storage(StorageError::UndoUnavailable { height: 3 }))
        ));
    }

    #[tokio::test]
    async fn stalled_source_switches_to_fallback() {
        let fallback = MockSource::new(chain(0..=6, 1));
        let primary = MockSource::new(chain(0..=3, 1)).with_fallback(fallback);
        let mut ingestor = ingestor(0);

        let summary = run_for(&mut ingestor, primary, Duration::from_millis(800))
            .await
            .unwrap();

        // Block 3 is re-fetched from the fallback, rolled back and re-applied.
        assert_eq!(summary.cursor, Some(6));
        assert_eq!(summary.rolled_back, 1);
        assert_eq!(summary.applied, 8);
        assert_eq!(ingestor.ledger().stats().unwrap().supply, 7_000);
    }

    #[tokio::test]
    async fn resumes_from_the_ledger_cursor() {
        let source = MockSource::new(chain(0..=9, 1));
        let mut first = ingestor(0);
        let mut summary = IngestSummary::default();
        for b in chain(0..=4, 1) {
            first.handle_block(b, &mut summary).unwrap();
        }
        let mut resumed = Ingestor::new(
            ProtocolEngine::new(params(0)),
            first.into_ledger(),
            fast_config(),
        );

        let summary = run_for(&mut resumed, source.clone(), Duration::from_millis(400))
            .await
            .unwrap();

        assert_eq!(summary.applied, 5);
        assert_eq!(summary.cursor, Some(9));
        assert_eq!(source.fetched().first(), Some(&5));
    }

    #[tokio::test]
    async fn resuming_after_a_reopen_matches_a_single_pass() {
        let blocks: Vec<Block> = (0..=19).map(busy_block).collect();
        let outputs: Vec<UtxoId> = blocks
            .iter()
            .flat_map(|b| &b.transactions)
            .flat_map(|tx| &tx.vout)
            .map(|out| out.utxo_id)
            .collect();

        let single_dir = TempDir::new().unwrap();
        let mut single = rocks_ingestor(single_dir.path());
        let summary = run_for(&mut single, MockSource::new(blocks.clone()), Duration::from_millis(800))
            .await
            .unwrap();
        assert_eq!(summary.cursor, Some(19));

        let split_dir = TempDir::new().unwrap();
        let mut first = rocks_ingestor(split_dir.path());
        let summary = run_for(
            &mut first,
            MockSource::new(blocks[..10].to_vec()),
            Duration::from_millis(600),
        )
        .await
        .unwrap();
        assert_eq!(summary.cursor, Some(9));
        drop(first.into_ledger());

        let mut second = rocks_ingestor(split_dir.path());
        let summary = run_for(&mut second, MockSource::new(blocks.clone()), Duration::from_millis(600))
            .await
            .unwrap();
        assert_eq!(summary.applied, 10);
        assert_eq!(summary.rolled_back, 0);

        let expected = single.ledger().stats().unwrap();
        let resumed = second.ledger().stats().unwrap();
        assert_eq!(resumed, expected);
        assert_eq!(expected.nice_hashes_count, 20);
        assert!(expected.utxos_count > 1);
        assert!(expected.is_conserved());
        for utxo_id in &outputs {
            assert_eq!(
                second.ledger().balance(utxo_id).unwrap(),
                single.ledger().balance(utxo_id).unwrap(),
                "balance of {utxo_id:?}"
            );
        }
        assert_eq!(
            second.ledger().latest_nice_hashes(20).unwrap(),
            single.ledger().latest_nice_hashes(20).unwrap()
        );
    }

    #[tokio::test]
    async fn fallback_node_reorg_rolls_back_the_tip() {
        // The primary node sits on a stale branch; the fallback node has
        // replaced block 5 and grown past it.
        let fallback = MockSource::new(chain(0..=5, 1));
        let fork = vec![child(5, 1, 2), block(6, 2), block(7, 2), block(8, 2)];
        fallback.reorg(5, fork);
        let primary = MockSource::new(chain(0..=5, 1)).with_fallback(fallback.clone());
        let mut ingestor = ingestor(0);

        let summary = run_for(&mut ingestor, primary, Duration::from_millis(800))
            .await
            .unwrap();

        assert_eq!(summary.cursor, Some(8));
        assert_eq!(summary.rolled_back, 1);
        assert_eq!(summary.applied, 10);
        assert_eq!(fallback.fetched().first(), Some(&5));

        let ledger = ingestor.ledger();
        assert_eq!(ledger.block_hash(5), Some(child(5, 1, 2).block_hash));
        let stale = OutPoint::new(tx_id(3, 5, 1), 0).utxo_id();
        let tip = OutPoint::new(tx_id(3, 8, 2), 0).utxo_id();
        assert_eq!(ledger.balance(&stale).unwrap(), 0);
        assert_eq!(ledger.balance(&tip).unwrap(), 9_000);
        assert_eq!(ledger.stats().unwrap().supply, 9_000);
    }

    #[tokio::test]
    async fn crashed_fetcher_without_fallback_is_fatal() {
        let source = MockSource::new(chain(0..=5, 1));
        source.crash_at(3);
        let mut ingestor = ingestor(0);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_for(&mut ingestor, source, Duration::from_secs(30)),
        )
        .await
        .expect("a dead fetcher must end the loop");

        assert!(matches!(
            result,
            Err(IngestError::FetcherExited { source_name: "mock" })
        ));
        assert_eq!(ingestor.ledger().stats().unwrap().last_parsed_block, Some(2));
    }

    #[tokio::test]
    async fn crashed_fetcher_hands_over_to_the_fallback_at_once() {
        let fallback = MockSource::new(chain(0..=6, 1));
        let primary = MockSource::new(chain(0..=6, 1)).with_fallback(fallback);
        primary.crash_at(2);
        let mut config = fast_config();
        config.idle_polls_before_fallback = 0;
        let mut ingestor =
            Ingestor::new(ProtocolEngine::new(params(0)), InMemoryLedger::new(4, 16).unwrap(), config);

        let summary = run_for(&mut ingestor, primary, Duration::from_millis(600))
            .await
            .unwrap();

        // Stall detection is off, so only the closed channel triggers the switch.
        assert_eq!(summary.cursor, Some(6));
        assert_eq!(summary.rolled_back, 1);
        assert_eq!(summary.applied, 8);
    }
}
