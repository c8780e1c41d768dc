//! HTTP route handlers.
//!
//! Handlers answer with JSON and report failures as a status code plus a
//! plain-text message.

pub mod balances;
pub mod health;
pub mod nicehashes;
pub mod stats;
pub mod utxos;

use axum::http::StatusCode;
use tracing::error;

use nice_indexer::StorageError;

pub(crate) type HandlerError = (StatusCode, String);

pub(crate) fn as_bad_request(msg: impl ToString) -> HandlerError {
    (StatusCode::BAD_REQUEST, msg.to_string())
}

pub(crate) fn as_internal(err: StorageError) -> HandlerError {
    error!(error = %err, "ledger read failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable".to_string())
}
