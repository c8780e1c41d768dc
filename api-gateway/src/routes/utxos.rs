use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use nice_indexer::{Amount, OutPoint, TxId};

use super::{HandlerError, as_bad_request, as_internal};
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct UtxoBalance {
    pub txid: String,
    pub vout: u32,
    pub utxo_id: String,
    pub balance: Amount,
}

/// `GET /utxos/{txid}/{vout}`
///
/// Balance held by one output; unknown outputs hold 0.
pub async fn balance(
    State(state): State<SharedState>,
    Path((txid, vout)): Path<(String, u32)>,
) -> Result<Json<UtxoBalance>, HandlerError> {
    let tx_id: TxId = txid.parse().map_err(as_bad_request)?;
    let outpoint = OutPoint::new(tx_id, vout);
    let balance = state
        .query
        .balance_for_outpoints(&[outpoint])
        .map_err(as_internal)?;

    Ok(Json(UtxoBalance {
        txid: tx_id.to_string(),
        vout,
        utxo_id: outpoint.utxo_id().to_string(),
        balance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn credited_output_has_its_balance() {
        let state = testing::state_with_reward();
        let Json(body) = balance(
            State(state.clone()),
            Path((testing::NICE_TXID.to_string(), 1)),
        )
        .await
        .unwrap();
        assert_eq!(body.balance, 250);
        assert_eq!(body.txid, testing::NICE_TXID);

        let Json(other) = balance(State(state), Path((testing::NICE_TXID.to_string(), 0)))
            .await
            .unwrap();
        assert_eq!(other.balance, 0);
    }

    #[tokio::test]
    async fn malformed_txid_is_a_bad_request() {
        let err = balance(
            State(testing::state_with_reward()),
            Path(("not-hex".to_string(), 0)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
