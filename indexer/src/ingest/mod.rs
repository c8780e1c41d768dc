//! Ingestion loop.
//!
//! The [`Ingestor`] is the single consumer of a [`crate::pipeline::BlockFetcher`].
//! It resumes from the ledger cursor, applies blocks in height order through
//! the [`crate::protocol::ProtocolEngine`], and treats a block at or below
//! the cursor as a reorg: the ledger is rolled back until the block fits.

pub mod engine;
pub mod error;

pub use engine::{IngestConfig, IngestSummary, Ingestor};
pub use error::IngestError;
