//! Balance ledger contract.
//!
//! This module defines what the ingestion loop and the read side expect
//! from a ledger backend:
//!
//! - [`LedgerStore`]: block/transaction-bracketed mutation, rollback and
//!   the durable resume cursor,
//! - [`LedgerReader`]: balance, nice-hash and stats queries,
//! - [`BlockJournal`]: staging shared by every backend,
//! - [`ShardRouter`]: deterministic `utxo_id` to shard mapping.
//!
//! Concrete backends live in [`crate::storage`].

pub mod error;
pub mod journal;
pub mod shard;
pub mod store;

pub use error::StorageError;
pub use journal::{BalanceChange, BlockChanges, BlockJournal};
pub use shard::{MAX_SHARDS, ShardRouter};
pub use store::{LedgerReader, LedgerStore};
