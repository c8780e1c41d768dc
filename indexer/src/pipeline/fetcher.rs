//! Background block fetcher with a bounded lookahead buffer.
//!
//! One producer task per [`BlockFetcher`] walks the chain from a start
//! height, pushing normalized blocks into a bounded `mpsc` channel. The
//! consumer pulls them with [`BlockFetcher::get_next_block`]. The producer
//! never skips a height: transient errors are retried with a backoff, and a
//! block that cannot be enqueued is held until the buffer drains.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::metrics::IngestMetrics;
use crate::source::{BlockSource, SourceError};
use crate::types::{Block, Height};

#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    #[error("invalid fetcher configuration: {0}")]
    InvalidConfig(String),
}

/// Tuning knobs of the producer loop.
#[derive(Clone, Debug)]
pub struct FetcherConfig {
    /// Hard capacity of the block buffer.
    pub buffer_capacity: usize,
    /// Buffered block count at which the producer stops fetching.
    pub throttle_at: usize,
    /// Heights fetched per tip query.
    pub batch_size: u64,
    /// Insert attempts per block before yielding the iteration.
    pub enqueue_attempts: u32,
    pub enqueue_timeout: Duration,
    /// Wait when the next height is above the tip.
    pub tip_poll_interval: Duration,
    pub tip_error_backoff: Duration,
    pub fetch_error_backoff: Duration,
    /// Wait while the buffer is at or above `throttle_at`.
    pub throttle_interval: Duration,
    /// How long `stop` waits for the producer to exit.
    pub stop_grace: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10,
            throttle_at: 8,
            batch_size: 16,
            enqueue_attempts: 5,
            enqueue_timeout: Duration::from_millis(500),
            tip_poll_interval: Duration::from_secs(5),
            tip_error_backoff: Duration::from_secs(1),
            fetch_error_backoff: Duration::from_millis(200),
            throttle_interval: Duration::from_millis(200),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl FetcherConfig {
    pub fn validate(&self) -> Result<(), FetcherError> {
        if self.buffer_capacity == 0 {
            return Err(FetcherError::InvalidConfig(
                "buffer_capacity must be positive".into(),
            ));
        }
        if self.throttle_at == 0 || self.throttle_at >= self.buffer_capacity {
            return Err(FetcherError::InvalidConfig(format!(
                "throttle_at ({}) must be in 1..{}",
                self.throttle_at, self.buffer_capacity
            )));
        }
        if self.batch_size == 0 {
            return Err(FetcherError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.enqueue_attempts == 0 {
            return Err(FetcherError::InvalidConfig(
                "enqueue_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`BlockFetcher::stop`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopReport {
    /// Whether the producer observed cancellation within the grace period.
    pub exited_in_time: bool,
    /// Buffered blocks dropped without being delivered.
    pub discarded: usize,
}

/// Consumer handle of a running fetch pipeline.
pub struct BlockFetcher {
    rx: mpsc::Receiver<Block>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stop_grace: Duration,
    source_name: &'static str,
    metrics: Option<IngestMetrics>,
}

impl BlockFetcher {
    /// Starts a producer fetching from `start_height` onwards.
    ///
    /// The producer is cancelled when `parent` is cancelled, when
    /// [`stop`](Self::stop) is called, or when the handle is dropped.
    pub fn spawn<S: BlockSource>(
        source: S,
        start_height: Height,
        config: FetcherConfig,
        parent: &CancellationToken,
        metrics: Option<IngestMetrics>,
    ) -> Result<Self, FetcherError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.buffer_capacity);
        let cancel = parent.child_token();
        let source_name = source.name();
        let stop_grace = config.stop_grace;

        info!(source = source_name, start_height, "starting block fetcher");

        let producer = Producer {
            source,
            next_height: start_height,
            pending: None,
            tx,
            config,
            cancel: cancel.clone(),
            metrics: metrics.clone(),
        };
        let handle = tokio::spawn(producer.run());

        Ok(Self {
            rx,
            cancel,
            handle: Some(handle),
            stop_grace,
            source_name,
            metrics,
        })
    }

    pub fn source_name(&self) -> &'static str {
        self.source_name
    }

    /// Next buffered block, or `None` if nothing arrived within `timeout`.
    pub async fn get_next_block(&mut self, timeout: Duration) -> Option<Block> {
        let block = tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten();
        if let Some(metrics) = &self.metrics {
            metrics.buffered_blocks.set(self.rx.len() as i64);
        }
        block
    }

    /// Whether the producer has exited and every block it sent was taken.
    pub fn is_exhausted(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }

    /// Cancels the producer, waits up to the grace period for it to exit,
    /// then discards whatever is still buffered.
    pub async fn stop(mut self) -> StopReport {
        self.cancel.cancel();

        let exited_in_time = match self.handle.take() {
            Some(mut handle) => match tokio::time::timeout(self.stop_grace, &mut handle).await {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    warn!(source = self.source_name, error = %err, "fetcher task ended abnormally");
                    true
                }
                Err(_) => {
                    warn!(
                        source = self.source_name,
                        grace = ?self.stop_grace,
                        "fetcher did not exit in time; aborting"
                    );
                    handle.abort();
                    false
                }
            },
            None => true,
        };

        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if let Some(metrics) = &self.metrics {
            metrics.buffered_blocks.set(0);
        }

        debug!(source = self.source_name, discarded, "block fetcher stopped");
        StopReport {
            exited_in_time,
            discarded,
        }
    }
}

impl Drop for BlockFetcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Enqueued {
    Sent,
    /// Attempts exhausted; the block is handed back.
    Full(Block),
    /// Receiver gone or cancellation requested.
    Closed,
}

struct Producer<S> {
    source: S,
    next_height: Height,
    pending: Option<Block>,
    tx: mpsc::Sender<Block>,
    config: FetcherConfig,
    cancel: CancellationToken,
    metrics: Option<IngestMetrics>,
}

impl<S: BlockSource> Producer<S> {
    async fn run(mut self) {
        while !self.cancel.is_cancelled() {
            if let Some(block) = self.pending.take() {
                match self.enqueue(block).await {
                    Enqueued::Sent => self.next_height += 1,
                    Enqueued::Full(block) => {
                        self.pending = Some(block);
                        continue;
                    }
                    Enqueued::Closed => break,
                }
            }

            let tip = tokio::select! {
                _ = self.cancel.cancelled() => break,
                tip = self.source.tip_height() => tip,
            };
            let tip = match tip {
                Ok(tip) => tip,
                Err(err) => {
                    warn!(source = self.source.name(), error = %err, "tip query failed");
                    self.record_error();
                    if !self.pause(self.config.tip_error_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if self.next_height > tip {
                trace!(next = self.next_height, tip, "caught up with tip");
                if !self.pause(self.config.tip_poll_interval).await {
                    break;
                }
                continue;
            }

            let batch_end = tip.min(self.next_height.saturating_add(self.config.batch_size - 1));
            if !self.fetch_batch(batch_end).await {
                break;
            }
        }
        debug!(source = self.source.name(), next = self.next_height, "fetcher exiting");
    }

    /// Fetches and enqueues heights up to `batch_end`. Returns `false` when
    /// the producer should exit.
    async fn fetch_batch(&mut self, batch_end: Height) -> bool {
        while self.next_height <= batch_end {
            if self.cancel.is_cancelled() {
                return false;
            }

            if self.buffered() >= self.config.throttle_at {
                if !self.pause(self.config.throttle_interval).await {
                    return false;
                }
                continue;
            }

            let height = self.next_height;
            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                block = self.source.fetch_block(height) => block,
            };
            let block = match fetched {
                Ok(block) => block,
                Err(SourceError::BeyondTip { .. }) => {
                    debug!(height, "height vanished from the tip; re-polling");
                    return self.pause(self.config.tip_poll_interval).await;
                }
                Err(err) => {
                    warn!(height, error = %err, "block fetch failed; retrying");
                    self.record_error();
                    if !self.pause(self.config.fetch_error_backoff).await {
                        return false;
                    }
                    continue;
                }
            };

            match self.enqueue(block).await {
                Enqueued::Sent => self.next_height += 1,
                Enqueued::Full(block) => {
                    debug!(height, "buffer full; holding block");
                    self.pending = Some(block);
                    return true;
                }
                Enqueued::Closed => return false,
            }
        }
        true
    }

    async fn enqueue(&self, mut block: Block) -> Enqueued {
        for attempt in 1..=self.config.enqueue_attempts {
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Enqueued::Closed,
                sent = self.tx.send_timeout(block, self.config.enqueue_timeout) => sent,
            };
            match sent {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.buffered_blocks.set(self.buffered() as i64);
                    }
                    return Enqueued::Sent;
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    trace!(attempt, "enqueue timed out");
                    block = returned;
                }
                Err(SendTimeoutError::Closed(_)) => return Enqueued::Closed,
            }
        }
        Enqueued::Full(block)
    }

    fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn record_error(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.fetch_errors.inc();
        }
    }

    /// Sleeps for `duration`; `false` if cancelled meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
