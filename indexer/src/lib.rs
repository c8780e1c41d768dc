//! Nice indexer library crate.
//!
//! This crate follows a UTXO chain, rewards transactions whose identifier
//! starts with a long run of zero hex digits, and keeps a sharded,
//! reorg-safe balance per unspent output. It provides:
//!
//! - strongly-typed domain types (`types`),
//! - block sources over the node's JSON-RPC (`source`),
//! - a bounded fetch pipeline (`pipeline`),
//! - the reward protocol (`protocol`),
//! - the ledger contract (`ledger`) and its backends (`storage`),
//! - the ingestion loop (`ingest`) and the read API (`query`),
//! - Prometheus-based metrics (`metrics`),
//! - and the top-level process configuration (`config`).
//!
//! Binaries compose these pieces: the `nice-indexer` CLI runs ingestion
//! only, the `api-gateway` also serves the read API over HTTP.

pub mod config;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod query;
pub mod source;
pub mod storage;
pub mod types;

pub use config::{AddressParams, ConfigError, IndexerConfig, MetricsConfig};

pub use ingest::{IngestConfig, IngestError, IngestSummary, Ingestor};
pub use ledger::{LedgerReader, LedgerStore, StorageError};
pub use pipeline::{BlockFetcher, FetcherConfig, FetcherError, StopReport};
pub use protocol::{BlockSummary, Network, ProtocolEngine, ProtocolParams};
pub use query::{DEFAULT_NICE_HASH_LIMIT, OutPointBalance, QueryService};
pub use source::{BlockSource, ChainSource, RpcClient, RpcConfig, SourceError, SourceKind};
pub use storage::{InMemoryLedger, RocksLedgerConfig, RocksLedgerReader, ShardedRocksLedger};

pub use metrics::{IngestMetrics, MetricsRegistry, run_prometheus_http_server};

// Domain types at the crate root for convenience.
pub use types::*;

/// Ledger backend used by the binaries.
pub type DefaultLedger = ShardedRocksLedger;

/// Ingestion loop over the default ledger.
pub type DefaultIngestor = Ingestor<DefaultLedger>;
