use crate::types::Height;

/// Errors raised by ledger backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying RocksDB error.
    #[error("rocksdb: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Required column family was not found.
    #[error("missing column family `{0}`")]
    MissingColumnFamily(&'static str),
    /// Stored bytes could not be interpreted.
    #[error("corrupted ledger data: {0}")]
    Corrupted(String),
    /// Record encoding or decoding failed.
    #[error("encoding: {0}")]
    Encoding(String),
    #[error("no block is open")]
    NoOpenBlock,
    #[error("block {height} is already open")]
    BlockAlreadyOpen { height: Height },
    #[error("no transaction is open")]
    NoOpenTransaction,
    #[error("a transaction is already open")]
    TransactionAlreadyOpen,
    #[error("block closed while a transaction is still open")]
    TransactionStillOpen,
    /// `start_block` was called for a height that does not follow the cursor.
    #[error("expected block {expected}, got {got}")]
    HeightMismatch { expected: Height, got: Height },
    /// Rollback must target exactly the last applied block.
    #[error("cannot roll back block {requested}: cursor is {cursor:?}")]
    RollbackOutOfOrder {
        requested: Height,
        cursor: Option<Height>,
    },
    /// The block is older than the retained undo history.
    #[error("no undo history for block {height}; reorg deeper than the retained window")]
    UndoUnavailable { height: Height },
    #[error("ledger was built with {stored} shards but {configured} are configured; re-index required")]
    ShardCountMismatch { stored: usize, configured: usize },
    #[error("shard count must be within 1..=256, got {0}")]
    InvalidShardCount(usize),
    #[error("ledger is closed")]
    Closed,
    /// An amount left the representable range; the chain data or ledger is inconsistent.
    #[error("amount overflow in {0}")]
    Overflow(&'static str),
}

impl StorageError {
    pub(crate) fn encoding(err: impl std::fmt::Display) -> Self {
        StorageError::Encoding(err.to_string())
    }
}
