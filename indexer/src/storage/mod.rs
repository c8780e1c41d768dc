//! Ledger backends.
//!
//! Concrete implementations of [`crate::ledger::LedgerStore`] and
//! [`crate::ledger::LedgerReader`]:
//!
//! - an in-memory ledger ([`mem::InMemoryLedger`]) for tests and replays,
//! - a RocksDB-backed sharded ledger ([`rocksdb::ShardedRocksLedger`]) for
//!   long-running indexers, with a shareable [`rocksdb::RocksLedgerReader`].

pub mod mem;
pub mod rocksdb;

pub use mem::InMemoryLedger;
pub use rocksdb::{RocksLedgerConfig, RocksLedgerReader, ShardedRocksLedger};
