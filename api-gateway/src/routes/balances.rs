use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::warn;

use nice_indexer::Amount;

use super::{HandlerError, as_bad_request, as_internal};
use crate::explorer::validate_address;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct AddressUtxo {
    pub txid: String,
    pub vout: u32,
    pub balance: Amount,
}

#[derive(Debug, Serialize)]
pub struct AddressBalance {
    pub address: String,
    pub total_balance: Amount,
    pub utxos: Vec<AddressUtxo>,
}

/// `GET /balances/{address}`
///
/// Resolves the address's nice unspent outputs through the explorer and
/// sums their ledger balances.
pub async fn by_address(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<AddressBalance>, HandlerError> {
    validate_address(&address, &state.address).map_err(as_bad_request)?;

    let outpoints = state
        .explorer
        .address_outpoints(&address, state.min_zero_count)
        .await
        .map_err(|e| {
            warn!(%address, error = %e, "explorer lookup failed");
            (StatusCode::BAD_GATEWAY, "block explorer unavailable".to_string())
        })?;

    let balances = state
        .query
        .outpoint_balances(&outpoints)
        .map_err(as_internal)?;

    let total_balance = balances
        .iter()
        .fold(0, |acc: Amount, b| acc.saturating_add(b.balance));
    let utxos = balances
        .into_iter()
        .map(|b| AddressUtxo {
            txid: b.outpoint.tx_id.to_string(),
            vout: b.outpoint.index,
            balance: b.balance,
        })
        .collect();

    Ok(Json(AddressBalance {
        address,
        total_balance,
        utxos,
    }))
}
