//! Shared application state.

use std::sync::Arc;

use nice_indexer::{AddressParams, LedgerReader, Network, QueryService};

use crate::explorer::ExplorerClient;

/// Shared state held by the request handlers.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    /// Cached read API over the ledger.
    pub query: QueryService<Arc<dyn LedgerReader>>,
    /// Resolves addresses to candidate outputs.
    pub explorer: ExplorerClient,
    pub address: AddressParams,
    pub network: Network,
    /// Zero-run a transaction needs before its outputs can hold a balance.
    pub min_zero_count: u8,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
