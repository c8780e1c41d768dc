use crate::ledger::StorageError;
use crate::pipeline::FetcherError;
use crate::types::Height;

/// Fatal conditions that stop the ingestion loop.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// A block arrived more than one height past the cursor.
    #[error("height gap: expected block {expected}, received {got}")]
    HeightGap { expected: Height, got: Height },

    /// The block producer exited and no fallback source is left.
    #[error("block fetcher for {source_name} exited with no fallback left")]
    FetcherExited { source_name: &'static str },

    #[error("block {height} is below the genesis height {genesis}")]
    BelowGenesis { height: Height, genesis: Height },
}
