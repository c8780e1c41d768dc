//! Fetch pipeline: a single background producer feeding a bounded buffer.

pub mod fetcher;

pub use fetcher::{BlockFetcher, FetcherConfig, FetcherError, StopReport};
