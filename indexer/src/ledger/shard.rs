//! Deterministic `utxo_id` to shard routing.

use super::StorageError;
use crate::types::UtxoId;

/// Largest supported shard count; routing uses a single key byte.
pub const MAX_SHARDS: usize = 256;

/// Routes ledger keys to shards by their first byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShardRouter {
    count: usize,
}

impl ShardRouter {
    pub fn new(count: usize) -> Result<Self, StorageError> {
        if count == 0 || count > MAX_SHARDS {
            return Err(StorageError::InvalidShardCount(count));
        }
        Ok(Self { count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Shard index holding `utxo_id`.
    pub fn shard_for(&self, utxo_id: &UtxoId) -> usize {
        usize::from(utxo_id.as_bytes()[0]) % self.count
    }

    /// Splits items into one bucket per shard, preserving input order.
    pub fn partition<T, F>(&self, items: impl IntoIterator<Item = T>, key: F) -> Vec<Vec<T>>
    where
        F: Fn(&T) -> &UtxoId,
    {
        let mut buckets: Vec<Vec<T>> = (0..self.count).map(|_| Vec::new()).collect();
        for item in items {
            let shard = self.shard_for(key(&item));
            buckets[shard].push(item);
        }
        buckets
    }
}
