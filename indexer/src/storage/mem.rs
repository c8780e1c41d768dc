//! In-memory ledger.
//!
//! Useful for unit tests and short replays. It keeps one `HashMap` per
//! shard and a bounded window of undo records, and goes through the same
//! [`BlockJournal`] as the RocksDB backend, so bracketing and rollback
//! rules are identical.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::ledger::{
    BalanceChange, BlockJournal, LedgerReader, LedgerStore, ShardRouter, StorageError,
};
use crate::types::{Amount, BlockHash, Height, LedgerStats, NiceHashEvent, TxId, UtxoId};

#[derive(Debug)]
struct UndoEntry {
    height: Height,
    balances: Vec<BalanceChange>,
    prior_stats: LedgerStats,
    event_count: usize,
}

/// In-memory implementation of [`LedgerStore`] and [`LedgerReader`].
#[derive(Debug)]
pub struct InMemoryLedger {
    router: ShardRouter,
    shards: Vec<HashMap<UtxoId, Amount>>,
    blocks: BTreeMap<Height, BlockHash>,
    nice_hashes: Vec<NiceHashEvent>,
    stats: LedgerStats,
    cursor: Option<Height>,
    undo: VecDeque<UndoEntry>,
    reorg_window: u64,
    journal: BlockJournal,
    closed: bool,
}

impl InMemoryLedger {
    /// Creates an empty ledger with `shard_count` shards that can roll back
    /// the last `reorg_window` blocks.
    pub fn new(shard_count: usize, reorg_window: u64) -> Result<Self, StorageError> {
        let router = ShardRouter::new(shard_count)?;
        Ok(Self {
            shards: (0..router.count()).map(|_| HashMap::new()).collect(),
            router,
            blocks: BTreeMap::new(),
            nice_hashes: Vec::new(),
            stats: LedgerStats::default(),
            cursor: None,
            undo: VecDeque::new(),
            reorg_window,
            journal: BlockJournal::new(),
            closed: false,
        })
    }

    /// Number of entries stored in `shard`.
    pub fn shard_len(&self, shard: usize) -> usize {
        self.shards.get(shard).map_or(0, HashMap::len)
    }

    /// Sum of every balance across all shards.
    pub fn total_balance(&self) -> Amount {
        self.shards.iter().flat_map(HashMap::values).sum()
    }

    /// Block hash recorded for `height`, if applied.
    pub fn block_hash(&self, height: Height) -> Option<BlockHash> {
        self.blocks.get(&height).copied()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn set_balance(&mut self, utxo_id: &UtxoId, balance: Amount) {
        let shard = &mut self.shards[self.router.shard_for(utxo_id)];
        if balance == 0 {
            shard.remove(utxo_id);
        } else {
            shard.insert(*utxo_id, balance);
        }
    }
}

impl LedgerStore for InMemoryLedger {
    fn start_block(&mut self, height: Height, block_hash: &BlockHash) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.journal.start_block(height, block_hash, self.cursor)
    }

    fn end_block(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        let changes = self.journal.finish()?;
        let prior_stats = self.stats;
        let next_stats = changes.next_stats(&prior_stats)?;

        for change in &changes.balances {
            self.set_balance(&change.utxo_id, change.current);
        }
        self.stats = next_stats;
        self.blocks.insert(changes.height, changes.block_hash);
        self.nice_hashes.extend(changes.events.iter().cloned());
        self.cursor = Some(changes.height);

        self.undo.push_back(UndoEntry {
            height: changes.height,
            balances: changes.balances,
            prior_stats,
            event_count: changes.events.len(),
        });
        while self
            .undo
            .front()
            .is_some_and(|entry| entry.height + self.reorg_window <= changes.height)
        {
            self.undo.pop_front();
        }
        Ok(())
    }

    fn abort_block(&mut self) {
        self.journal.abort();
    }

    fn start_transaction(&mut self, tx_id: &TxId, reward: Amount) -> Result<(), StorageError> {
        self.journal.start_transaction(tx_id, reward)
    }

    fn end_transaction(&mut self) -> Result<(), StorageError> {
        self.journal.end_transaction()
    }

    fn pop_balance(&mut self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        let shard = &self.shards[self.router.shard_for(utxo_id)];
        self.journal
            .pop_balance(utxo_id, |id| Ok(shard.get(id).copied()))
    }

    fn add_balance(&mut self, utxo_id: &UtxoId, amount: Amount) -> Result<(), StorageError> {
        let shard = &self.shards[self.router.shard_for(utxo_id)];
        self.journal
            .add_balance(utxo_id, amount, |id| Ok(shard.get(id).copied()))
    }

    fn rollback_block(&mut self, height: Height) -> Result<(), StorageError> {
        self.ensure_open()?;
        if self.journal.is_open() {
            return Err(StorageError::BlockAlreadyOpen { height });
        }
        if self.cursor != Some(height) {
            return Err(StorageError::RollbackOutOfOrder {
                requested: height,
                cursor: self.cursor,
            });
        }
        if self.undo.back().map(|entry| entry.height) != Some(height) {
            return Err(StorageError::UndoUnavailable { height });
        }
        let entry = self
            .undo
            .pop_back()
            .ok_or(StorageError::UndoUnavailable { height })?;

        for change in &entry.balances {
            self.set_balance(&change.utxo_id, change.prior.unwrap_or(0));
        }
        let kept = self.nice_hashes.len().saturating_sub(entry.event_count);
        self.nice_hashes.truncate(kept);
        self.blocks.remove(&height);
        self.stats = entry.prior_stats;
        self.cursor = height.checked_sub(1);
        Ok(())
    }

    fn last_indexed_block(&self) -> Result<Option<Height>, StorageError> {
        Ok(self.cursor)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.journal.abort();
        self.closed = true;
        Ok(())
    }
}

impl LedgerReader for InMemoryLedger {
    fn balance(&self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        let shard = &self.shards[self.router.shard_for(utxo_id)];
        Ok(shard.get(utxo_id).copied().unwrap_or(0))
    }

    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        Ok(self.nice_hashes.iter().rev().take(limit).cloned().collect())
    }

    fn stats(&self) -> Result<LedgerStats, StorageError> {
        Ok(self.stats)
    }

    fn max_height(&self) -> Result<Option<Height>, StorageError> {
        Ok(self.blocks.keys().next_back().copied())
    }
}
