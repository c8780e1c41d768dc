//! RocksDB-backed sharded ledger.
//!
//! The ledger is one directory holding an un-sharded index database and
//! `shard_count` shard databases:
//!
//! - `index/`: column families
//!   - `"blocks"`:     height (BE) -> block hash,
//!   - `"nicehashes"`: height (BE) ++ seq (BE) -> bincode [`NiceHashEvent`],
//!   - `"stats"`:      `"stats"` -> bincode [`LedgerStats`],
//!   - `"undo"`:       height (BE) -> bincode stats before that block,
//!   - `"meta"`:       `"cursor"` and `"shard_count"`.
//! - `shard-NN/`: column families
//!   - `"balances"`: `utxo_id` -> balance (u64 LE),
//!   - `"undo"`:     height (BE) ++ `utxo_id` -> prior balance, empty if absent.
//!
//! A block commits every touched shard first, then the index. The index
//! batch carries the cursor and is the commit point: on open, shard undo
//! records above the cursor are replayed, which undoes a block whose
//! index write never happened and finishes an interrupted rollback.
//! Shards only drop undo history the committed cursor can no longer reach,
//! so a block lost between the two writes never shortens the reorg window.
//!
//! Other processes read the same directory through
//! [`RocksLedgerReader::open_secondary`], which takes no lock and never
//! writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::ledger::{
    BlockChanges, BlockJournal, LedgerReader, LedgerStore, ShardRouter, StorageError,
};
use crate::types::{
    Amount, BlockHash, HASH_LEN, Height, LedgerStats, NiceHashEvent, TxId, UTXO_ID_LEN, UtxoId,
};

const CF_BALANCES: &str = "balances";
const CF_UNDO: &str = "undo";
const CF_BLOCKS: &str = "blocks";
const CF_NICEHASHES: &str = "nicehashes";
const CF_STATS: &str = "stats";
const CF_META: &str = "meta";

const KEY_CURSOR: &[u8] = b"cursor";
const KEY_SHARD_COUNT: &[u8] = b"shard_count";
const KEY_STATS: &[u8] = b"stats";

/// Configuration for [`ShardedRocksLedger`].
#[derive(Clone, Debug)]
pub struct RocksLedgerConfig {
    /// Directory holding the index and shard databases.
    pub path: PathBuf,
    /// Number of shard databases. Fixed for the life of a ledger.
    pub shard_count: usize,
    /// Number of most recent blocks that can be rolled back.
    pub reorg_window: u64,
    /// fsync the WAL on every commit.
    pub sync_writes: bool,
    /// Create databases and column families that do not exist yet.
    pub create_if_missing: bool,
}

impl Default for RocksLedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/balances"),
            shard_count: 10,
            reorg_window: 100,
            sync_writes: true,
            create_if_missing: true,
        }
    }
}

struct Databases {
    index: DB,
    shards: Vec<DB>,
    router: ShardRouter,
    /// Set for secondary instances; dropped after the databases.
    scratch: Option<ScratchDir>,
}

/// Private directory of a secondary instance, removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create() -> Result<Self, StorageError> {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "nice-indexer-reader-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            debug!(path = %self.0.display(), error = %e, "could not remove reader scratch dir");
        }
    }
}

impl Databases {
    fn cf<'a>(db: &'a DB, name: &'static str) -> Result<Arc<BoundColumnFamily<'a>>, StorageError> {
        db.cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn shard(&self, utxo_id: &UtxoId) -> &DB {
        &self.shards[self.router.shard_for(utxo_id)]
    }

    fn balance(&self, utxo_id: &UtxoId) -> Result<Option<Amount>, StorageError> {
        let db = self.shard(utxo_id);
        let cf = Self::cf(db, CF_BALANCES)?;
        db.get_cf(&cf, utxo_id.as_bytes())?
            .map(|bytes| decode_amount(&bytes))
            .transpose()
    }

    fn cursor(&self) -> Result<Option<Height>, StorageError> {
        let cf = Self::cf(&self.index, CF_META)?;
        self.index
            .get_cf(&cf, KEY_CURSOR)?
            .map(|bytes| decode_height(&bytes))
            .transpose()
    }

    fn stats(&self) -> Result<LedgerStats, StorageError> {
        let cf = Self::cf(&self.index, CF_STATS)?;
        match self.index.get_cf(&cf, KEY_STATS)? {
            Some(bytes) => decode(&bytes),
            None => Ok(LedgerStats::default()),
        }
    }

    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        let cf = Self::cf(&self.index, CF_NICEHASHES)?;
        let mut events = Vec::with_capacity(limit.min(64));
        for item in self.index.iterator_cf(&cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            events.push(decode(&value)?);
        }
        Ok(events)
    }

    fn max_height(&self) -> Result<Option<Height>, StorageError> {
        let cf = Self::cf(&self.index, CF_BLOCKS)?;
        match self.index.iterator_cf(&cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_height(&key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn write_options(sync: bool) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(sync);
        opts
    }

    /// Restores every shard entry touched above `cursor` to its value at
    /// `cursor` and deletes the replayed undo records.
    fn replay_undo_above(&self, cursor: Option<Height>, sync: bool) -> Result<usize, StorageError> {
        let from = match cursor {
            Some(height) => match height.checked_add(1) {
                Some(next) => next,
                None => return Ok(0),
            },
            None => 0,
        };
        let start = from.to_be_bytes();
        let opts = Self::write_options(sync);
        let mut restored = 0;

        for (index, db) in self.shards.iter().enumerate() {
            let cf_undo = Self::cf(db, CF_UNDO)?;
            let cf_balances = Self::cf(db, CF_BALANCES)?;

            // Ascending order: the first record per key holds its value at `cursor`.
            let mut priors: BTreeMap<UtxoId, Option<Amount>> = BTreeMap::new();
            let mut undo_keys = Vec::new();
            for item in db.iterator_cf(&cf_undo, IteratorMode::From(&start, Direction::Forward)) {
                let (key, value) = item?;
                let (_, utxo_id) = split_undo_key(&key)?;
                priors.entry(utxo_id).or_insert(decode_prior(&value)?);
                undo_keys.push(key);
            }
            if undo_keys.is_empty() {
                continue;
            }

            let mut batch = WriteBatch::default();
            for (utxo_id, prior) in &priors {
                match prior {
                    Some(balance) if *balance > 0 => {
                        batch.put_cf(&cf_balances, utxo_id.as_bytes(), balance.to_le_bytes())
                    }
                    _ => batch.delete_cf(&cf_balances, utxo_id.as_bytes()),
                }
            }
            for key in &undo_keys {
                batch.delete_cf(&cf_undo, key);
            }
            db.write_opt(batch, &opts)?;

            debug!(shard = index, entries = priors.len(), "replayed shard undo records");
            restored += priors.len();
        }
        Ok(restored)
    }
}

/// RocksDB-backed implementation of [`LedgerStore`].
pub struct ShardedRocksLedger {
    dbs: Arc<Databases>,
    journal: BlockJournal,
    cursor: Option<Height>,
    stats: LedgerStats,
    reorg_window: u64,
    sync_writes: bool,
    closed: bool,
}

impl ShardedRocksLedger {
    /// Opens (or creates) the ledger under `cfg.path` and replays any
    /// uncommitted shard writes.
    pub fn open(cfg: &RocksLedgerConfig) -> Result<Self, StorageError> {
        let router = ShardRouter::new(cfg.shard_count)?;
        if cfg.create_if_missing {
            std::fs::create_dir_all(&cfg.path)?;
        }

        let index = open_db(
            &cfg.path.join("index"),
            &[CF_BLOCKS, CF_NICEHASHES, CF_STATS, CF_UNDO, CF_META],
            cfg.create_if_missing,
        )?;
        check_shard_count(&index, router.count())?;

        let shards = (0..router.count())
            .map(|i| {
                open_db(
                    &cfg.path.join(shard_dir(i)),
                    &[CF_BALANCES, CF_UNDO],
                    cfg.create_if_missing,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dbs = Arc::new(Databases {
            index,
            shards,
            router,
            scratch: None,
        });
        let cursor = dbs.cursor()?;
        let stats = dbs.stats()?;

        let replayed = dbs.replay_undo_above(cursor, cfg.sync_writes)?;
        if replayed > 0 {
            warn!(?cursor, entries = replayed, "rolled back uncommitted shard writes");
        }
        info!(
            path = %cfg.path.display(),
            shards = router.count(),
            ?cursor,
            "opened ledger"
        );

        Ok(Self {
            dbs,
            journal: BlockJournal::new(),
            cursor,
            stats,
            reorg_window: cfg.reorg_window,
            sync_writes: cfg.sync_writes,
            closed: false,
        })
    }

    /// Cloneable read handle sharing this ledger's databases.
    pub fn reader(&self) -> RocksLedgerReader {
        RocksLedgerReader {
            dbs: Arc::clone(&self.dbs),
        }
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// First height whose undo history is still retained after committing `height`.
    fn retained_from(&self, height: Height) -> Option<Height> {
        (height + 1)
            .checked_sub(self.reorg_window)
            .filter(|from| *from > 0)
    }

    /// Undo history the shards may drop while committing `height`.
    ///
    /// Shards commit before the index, so until the index write lands the
    /// cursor is still `height - 1` and its whole window must stay intact.
    fn shard_prune_bound(&self, height: Height) -> Option<Height> {
        height
            .checked_sub(1)
            .and_then(|committed| self.retained_from(committed))
    }

    fn commit_shards(
        &self,
        changes: &BlockChanges,
        prune_below: Option<Height>,
    ) -> Result<(), StorageError> {
        let opts = Databases::write_options(self.sync_writes);
        let buckets = self
            .dbs
            .router
            .partition(changes.balances.iter(), |change| &change.utxo_id);

        for (db, bucket) in self.dbs.shards.iter().zip(buckets) {
            if bucket.is_empty() && prune_below.is_none() {
                continue;
            }
            let cf_balances = Databases::cf(db, CF_BALANCES)?;
            let cf_undo = Databases::cf(db, CF_UNDO)?;

            let mut batch = WriteBatch::default();
            for change in bucket {
                let key = change.utxo_id.as_bytes();
                if change.current == 0 {
                    batch.delete_cf(&cf_balances, key);
                } else {
                    batch.put_cf(&cf_balances, key, change.current.to_le_bytes());
                }
                batch.put_cf(
                    &cf_undo,
                    undo_key(changes.height, &change.utxo_id),
                    encode_prior(change.prior),
                );
            }
            if let Some(below) = prune_below {
                batch.delete_range_cf(&cf_undo, 0u64.to_be_bytes(), below.to_be_bytes());
            }
            db.write_opt(batch, &opts)?;
        }
        Ok(())
    }

    fn commit_index(
        &self,
        changes: &BlockChanges,
        next_stats: &LedgerStats,
        prune_below: Option<Height>,
    ) -> Result<(), StorageError> {
        let db = &self.dbs.index;
        let cf_blocks = Databases::cf(db, CF_BLOCKS)?;
        let cf_nicehashes = Databases::cf(db, CF_NICEHASHES)?;
        let cf_stats = Databases::cf(db, CF_STATS)?;
        let cf_undo = Databases::cf(db, CF_UNDO)?;
        let cf_meta = Databases::cf(db, CF_META)?;

        let height_key = changes.height.to_be_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_blocks, height_key, changes.block_hash.as_bytes());
        for (seq, event) in changes.events.iter().enumerate() {
            batch.put_cf(&cf_nicehashes, event_key(changes.height, seq as u32), encode(event)?);
        }
        batch.put_cf(&cf_stats, KEY_STATS, encode(next_stats)?);
        batch.put_cf(&cf_undo, height_key, encode(&self.stats)?);
        if let Some(below) = prune_below {
            batch.delete_range_cf(&cf_undo, 0u64.to_be_bytes(), below.to_be_bytes());
        }
        batch.put_cf(&cf_meta, KEY_CURSOR, height_key);

        db.write_opt(batch, &Databases::write_options(self.sync_writes))?;
        Ok(())
    }
}

impl LedgerStore for ShardedRocksLedger {
    fn start_block(&mut self, height: Height, block_hash: &BlockHash) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.journal.start_block(height, block_hash, self.cursor)
    }

    fn end_block(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        let changes = self.journal.finish()?;
        let next_stats = changes.next_stats(&self.stats)?;
        self.commit_shards(&changes, self.shard_prune_bound(changes.height))?;
        let prune_below = self.retained_from(changes.height);
        if let Err(err) = self.commit_index(&changes, &next_stats, prune_below) {
            // The shards already hold this block; put them back to the cursor.
            if let Err(replay_err) = self.dbs.replay_undo_above(self.cursor, self.sync_writes) {
                warn!(error = %replay_err, "shard replay failed; will retry on next open");
            }
            return Err(err);
        }

        debug!(
            height = changes.height,
            entries = changes.balances.len(),
            events = changes.events.len(),
            "block committed"
        );
        self.cursor = Some(changes.height);
        self.stats = next_stats;
        Ok(())
    }

    fn abort_block(&mut self) {
        if let Some(height) = self.journal.abort() {
            debug!(height, "block aborted");
        }
    }

    fn start_transaction(&mut self, tx_id: &TxId, reward: Amount) -> Result<(), StorageError> {
        self.journal.start_transaction(tx_id, reward)
    }

    fn end_transaction(&mut self) -> Result<(), StorageError> {
        self.journal.end_transaction()
    }

    fn pop_balance(&mut self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        let dbs = &self.dbs;
        self.journal.pop_balance(utxo_id, |id| dbs.balance(id))
    }

    fn add_balance(&mut self, utxo_id: &UtxoId, amount: Amount) -> Result<(), StorageError> {
        let dbs = &self.dbs;
        self.journal.add_balance(utxo_id, amount, |id| dbs.balance(id))
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

        let db = &self.dbs.index;
        let cf_blocks = Databases::cf(db, CF_BLOCKS)?;
        let cf_nicehashes = Databases::cf(db, CF_NICEHASHES)?;
        let cf_stats = Databases::cf(db, CF_STATS)?;
        let cf_undo = Databases::cf(db, CF_UNDO)?;
        let cf_meta = Databases::cf(db, CF_META)?;

        let height_key = height.to_be_bytes();
        let prior_stats: LedgerStats = match db.get_cf(&cf_undo, height_key)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(StorageError::UndoUnavailable { height }),
        };
        let cursor = height.checked_sub(1);

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_blocks, height_key);
        batch.delete_range_cf(
            &cf_nicehashes,
            event_key(height, 0),
            event_key(height + 1, 0),
        );
        batch.put_cf(&cf_stats, KEY_STATS, encode(&prior_stats)?);
        batch.delete_cf(&cf_undo, height_key);
        match cursor {
            Some(cursor) => batch.put_cf(&cf_meta, KEY_CURSOR, cursor.to_be_bytes()),
            None => batch.delete_cf(&cf_meta, KEY_CURSOR),
        }
        db.write_opt(batch, &Databases::write_options(self.sync_writes))?;

        self.cursor = cursor;
        self.stats = prior_stats;
        let restored = self.dbs.replay_undo_above(cursor, self.sync_writes)?;
        info!(height, entries = restored, "block rolled back");
        Ok(())
    }

    fn last_indexed_block(&self) -> Result<Option<Height>, StorageError> {
        Ok(self.cursor)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.abort_block();
        self.dbs.index.flush()?;
        for db in &self.dbs.shards {
            db.flush()?;
        }
        self.closed = true;
        info!(cursor = ?self.cursor, "ledger closed");
        Ok(())
    }
}

impl LedgerReader for ShardedRocksLedger {
    fn balance(&self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        Ok(self.dbs.balance(utxo_id)?.unwrap_or(0))
    }

    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        self.dbs.latest_nice_hashes(limit)
    }

    fn stats(&self) -> Result<LedgerStats, StorageError> {
        Ok(self.stats)
    }

    fn max_height(&self) -> Result<Option<Height>, StorageError> {
        self.dbs.max_height()
    }
}

/// Shared read handle over an open [`ShardedRocksLedger`].
#[derive(Clone)]
pub struct RocksLedgerReader {
    dbs: Arc<Databases>,
}

impl RocksLedgerReader {
    /// Opens the ledger under `cfg.path` as a RocksDB secondary instance.
    ///
    /// The reader takes no lock and performs no writes or recovery, so it
    /// can run next to a [`ShardedRocksLedger`] owned by another process.
    /// It sees the state at open time until [`catch_up`](Self::catch_up)
    /// is called.
    pub fn open_secondary(cfg: &RocksLedgerConfig) -> Result<Self, StorageError> {
        let router = ShardRouter::new(cfg.shard_count)?;
        let scratch = ScratchDir::create()?;

        let index = open_secondary_db(
            &cfg.path.join("index"),
            &scratch.0.join("index"),
            &[CF_BLOCKS, CF_NICEHASHES, CF_STATS, CF_UNDO, CF_META],
        )?;
        if let Some(stored) = stored_shard_count(&index)? {
            if stored != router.count() {
                return Err(StorageError::ShardCountMismatch {
                    stored,
                    configured: router.count(),
                });
            }
        }

        let shards = (0..router.count())
            .map(|i| {
                open_secondary_db(
                    &cfg.path.join(shard_dir(i)),
                    &scratch.0.join(shard_dir(i)),
                    &[CF_BALANCES, CF_UNDO],
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(path = %cfg.path.display(), shards = router.count(), "opened ledger reader");
        Ok(Self {
            dbs: Arc::new(Databases {
                index,
                shards,
                router,
                scratch: Some(scratch),
            }),
        })
    }

    /// Pulls in everything the owning process committed since the last call.
    ///
    /// A no-op for readers obtained from [`ShardedRocksLedger::reader`].
    /// Shard balances of a block may become visible slightly before its
    /// index entry and stats.
    pub fn catch_up(&self) -> Result<(), StorageError> {
        if self.dbs.scratch.is_none() {
            return Ok(());
        }
        self.dbs.index.try_catch_up_with_primary()?;
        for db in &self.dbs.shards {
            db.try_catch_up_with_primary()?;
        }
        Ok(())
    }

    /// Resume cursor as last seen by this reader.
    pub fn last_indexed_block(&self) -> Result<Option<Height>, StorageError> {
        self.dbs.cursor()
    }

    /// Block hash recorded for `height`, if that block is applied.
    pub fn block_hash(&self, height: Height) -> Result<Option<BlockHash>, StorageError> {
        let cf = Databases::cf(&self.dbs.index, CF_BLOCKS)?;
        self.dbs
            .index
            .get_cf(&cf, height.to_be_bytes())?
            .map(|bytes| decode_block_hash(&bytes))
            .transpose()
    }

    pub fn shard_count(&self) -> usize {
        self.dbs.router.count()
    }
}

impl LedgerReader for RocksLedgerReader {
    fn balance(&self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        Ok(self.dbs.balance(utxo_id)?.unwrap_or(0))
    }

    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        self.dbs.latest_nice_hashes(limit)
    }

    fn stats(&self) -> Result<LedgerStats, StorageError> {
        self.dbs.stats()
    }

    fn max_height(&self) -> Result<Option<Height>, StorageError> {
        self.dbs.max_height()
    }
}

fn open_db(path: &Path, cf_names: &[&'static str], create: bool) -> Result<DB, StorageError> {
    let mut opts = Options::default();
    opts.create_if_missing(create);
    opts.create_missing_column_families(create);

    let cfs = std::iter::once("default")
        .chain(cf_names.iter().copied())
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

    Ok(DB::open_cf_descriptors(&opts, path, cfs)?)
}

fn open_secondary_db(
    primary: &Path,
    scratch: &Path,
    cf_names: &[&'static str],
) -> Result<DB, StorageError> {
    let mut opts = Options::default();
    opts.set_max_open_files(-1);
    let cfs = std::iter::once("default").chain(cf_names.iter().copied());
    Ok(DB::open_cf_as_secondary(&opts, primary, scratch, cfs)?)
}

fn shard_dir(index: usize) -> String {
    format!("shard-{index:02}")
}

fn stored_shard_count(index: &DB) -> Result<Option<usize>, StorageError> {
    let cf = Databases::cf(index, CF_META)?;
    index
        .get_cf(&cf, KEY_SHARD_COUNT)?
        .map(|bytes| -> Result<usize, StorageError> {
            let stored: [u8; 4] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StorageError::Corrupted("shard count length".into()))?;
            Ok(u32::from_be_bytes(stored) as usize)
        })
        .transpose()
}

fn check_shard_count(index: &DB, configured: usize) -> Result<(), StorageError> {
    match stored_shard_count(index)? {
        Some(stored) if stored != configured => {
            Err(StorageError::ShardCountMismatch { stored, configured })
        }
        Some(_) => Ok(()),
        None => {
            let cf = Databases::cf(index, CF_META)?;
            // ShardRouter caps the count at 256.
            index.put_cf(&cf, KEY_SHARD_COUNT, (configured as u32).to_be_bytes())?;
            Ok(())
        }
    }
}

fn undo_key(height: Height, utxo_id: &UtxoId) -> [u8; 8 + UTXO_ID_LEN] {
    let mut key = [0u8; 8 + UTXO_ID_LEN];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(utxo_id.as_bytes());
    key
}

fn split_undo_key(key: &[u8]) -> Result<(Height, UtxoId), StorageError> {
    if key.len() != 8 + UTXO_ID_LEN {
        return Err(StorageError::Corrupted(format!("undo key of {} bytes", key.len())));
    }
    let height = decode_height(&key[..8])?;
    let utxo_id =
        UtxoId::from_slice(&key[8..]).map_err(|e| StorageError::Corrupted(e.to_string()))?;
    Ok((height, utxo_id))
}

fn event_key(height: Height, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn encode_prior(prior: Option<Amount>) -> Vec<u8> {
    prior.map(|v| v.to_le_bytes().to_vec()).unwrap_or_default()
}

fn decode_prior(bytes: &[u8]) -> Result<Option<Amount>, StorageError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    decode_amount(bytes).map(Some)
}

fn decode_amount(bytes: &[u8]) -> Result<Amount, StorageError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupted(format!("balance of {} bytes", bytes.len())))?;
    Ok(Amount::from_le_bytes(arr))
}

fn decode_height(bytes: &[u8]) -> Result<Height, StorageError> {
    let arr: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Corrupted(format!("height of {} bytes", bytes.len())))?;
    Ok(Height::from_be_bytes(arr))
}

fn decode_block_hash(bytes: &[u8]) -> Result<BlockHash, StorageError> {
    let arr: [u8; HASH_LEN] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupted("block hash length".into()))?;
    Ok(BlockHash(crate::types::Hash256(arr)))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(StorageError::encoding)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(StorageError::encoding)
}
