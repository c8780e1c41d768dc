//! Read API over a ledger.
//!
//! [`QueryService`] wraps a [`LedgerReader`] and adds outpoint lookups and a
//! small cache for the aggregate queries. Cached answers are keyed by the
//! ledger's max ingested height and dropped as soon as it changes, so a
//! reorg or a newly applied block is visible on the next call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::ledger::{LedgerReader, StorageError};
use crate::types::{Amount, Height, LedgerStats, NiceHashEvent, OutPoint};

/// Number of nice-hash events returned when the caller does not ask.
pub const DEFAULT_NICE_HASH_LIMIT: usize = 50;

/// Balance of one outpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct OutPointBalance {
    pub outpoint: OutPoint,
    pub balance: Amount,
}

#[derive(Default)]
struct QueryCache {
    height: Option<Height>,
    stats: Option<LedgerStats>,
    nice_hashes: HashMap<usize, Vec<NiceHashEvent>>,
}

pub struct QueryService<R> {
    reader: R,
    cache: Mutex<QueryCache>,
}

impl<R: LedgerReader> QueryService<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cache: Mutex::new(QueryCache::default()),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Highest ingested height, uncached.
    pub fn max_height(&self) -> Result<Option<Height>, StorageError> {
        self.reader.max_height()
    }

    /// Balance of each outpoint, in input order.
    pub fn outpoint_balances(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<OutPointBalance>, StorageError> {
        outpoints
            .iter()
            .map(|outpoint| {
                Ok(OutPointBalance {
                    outpoint: *outpoint,
                    balance: self.reader.balance(&outpoint.utxo_id())?,
                })
            })
            .collect()
    }

    /// Sum of the balances of `outpoints`, whichever shards they live in.
    pub fn balance_for_outpoints(&self, outpoints: &[OutPoint]) -> Result<Amount, StorageError> {
        let mut total: Amount = 0;
        for outpoint in outpoints {
            total = total.saturating_add(self.reader.balance(&outpoint.utxo_id())?);
        }
        Ok(total)
    }

    /// Most recent nice-hash events, newest first.
    pub fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        let mut cache = self.fresh_cache()?;
        if let Some(events) = cache.nice_hashes.get(&limit) {
            return Ok(events.clone());
        }
        let events = self.reader.latest_nice_hashes(limit)?;
        cache.nice_hashes.insert(limit, events.clone());
        Ok(events)
    }

    pub fn stats(&self) -> Result<LedgerStats, StorageError> {
        let mut cache = self.fresh_cache()?;
        if let Some(stats) = cache.stats {
            return Ok(stats);
        }
        let stats = self.reader.stats()?;
        cache.stats = Some(stats);
        Ok(stats)
    }

    /// Locks the cache, clearing it first if the ledger height moved.
    fn fresh_cache(&self) -> Result<MutexGuard<'_, QueryCache>, StorageError> {
        let height = self.reader.max_height()?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.height != height {
            *cache = QueryCache {
                height,
                ..QueryCache::default()
            };
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use crate::ledger::LedgerStore;
    use crate::storage::InMemoryLedger;
    use crate::types::{BlockHash, HASH_LEN, TxId};

    #[derive(Default)]
    struct CountingReader {
        height: AtomicU64,
        stats_calls: AtomicUsize,
        nice_calls: AtomicUsize,
    }

    impl LedgerReader for CountingReader {
        fn balance(&self, _: &crate::types::UtxoId) -> Result<Amount, StorageError> {
            Ok(0)
        }

        fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
            self.nice_calls.fetch_add(1, Ordering::SeqCst);
            let height = self.height.load(Ordering::SeqCst);
            Ok((0..limit as u64)
                .map(|i| NiceHashEvent {
                    height: height - i,
                    tx_id: TxId::default(),
                    reward: 1,
                })
                .collect())
        }

        fn stats(&self) -> Result<LedgerStats, StorageError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            Ok(LedgerStats {
                last_parsed_block: Some(self.height.load(Ordering::SeqCst)),
                ..LedgerStats::default()
            })
        }

        fn max_height(&self) -> Result<Option<Height>, StorageError> {
            Ok(Some(self.height.load(Ordering::SeqCst)))
        }
    }

    #[test]
    fn cache_is_keyed_by_max_height() {
        let reader = std::sync::Arc::new(CountingReader::default());
        reader.height.store(10, Ordering::SeqCst);
        let service = QueryService::new(reader.clone());

        assert_eq!(service.stats().unwrap().last_parsed_block, Some(10));
        assert_eq!(service.stats().unwrap().last_parsed_block, Some(10));
        assert_eq!(reader.stats_calls.load(Ordering::SeqCst), 1);

        service.latest_nice_hashes(3).unwrap();
        service.latest_nice_hashes(3).unwrap();
        service.latest_nice_hashes(5).unwrap();
        assert_eq!(reader.nice_calls.load(Ordering::SeqCst), 2);

        reader.height.store(11, Ordering::SeqCst);
        assert_eq!(service.stats().unwrap().last_parsed_block, Some(11));
        assert_eq!(service.latest_nice_hashes(3).unwrap()[0].height, 11);
        assert_eq!(reader.stats_calls.load(Ordering::SeqCst), 2);
        assert_eq!(reader.nice_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn outpoint_balances_sum_across_shards() {
        let tx_id = TxId::from_bytes([7; HASH_LEN]);
        let outpoints: Vec<OutPoint> = (0..6).map(|n| OutPoint::new(tx_id, n)).collect();

        let mut ledger = InMemoryLedger::new(3, 10).unwrap();
        ledger.start_block(1, &BlockHash::default()).unwrap();
        ledger.start_transaction(&tx_id, 60).unwrap();
        for outpoint in &outpoints {
            ledger.add_balance(&outpoint.utxo_id(), 10).unwrap();
        }
        ledger.end_transaction().unwrap();
        ledger.end_block().unwrap();

        let service = QueryService::new(ledger);
        assert_eq!(service.balance_for_outpoints(&outpoints).unwrap(), 60);

        let missing = OutPoint::new(tx_id, 99);
        let per_outpoint = service.outpoint_balances(&[outpoints[0], missing]).unwrap();
        assert_eq!(per_outpoint[0].balance, 10);
        assert_eq!(per_outpoint[1].balance, 0);
    }
}
