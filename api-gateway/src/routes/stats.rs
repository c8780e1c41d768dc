use axum::{Json, extract::State};
use serde::Serialize;

use nice_indexer::{Amount, Height};

use super::{HandlerError, as_internal};
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub supply: Amount,
    pub utxos_count: u64,
    pub nice_hashes_count: u64,
    pub max_zero: u8,
    pub last_parsed_block: Option<Height>,
}

/// `GET /stats`
pub async fn stats(State(state): State<SharedState>) -> Result<Json<StatsResponse>, HandlerError> {
    let stats = state.query.stats().map_err(as_internal)?;
    Ok(Json(StatsResponse {
        supply: stats.supply,
        utxos_count: stats.utxos_count,
        nice_hashes_count: stats.nice_hashes_count,
        max_zero: stats.max_zero,
        last_parsed_block: stats.last_parsed_block,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing;

    #[tokio::test]
    async fn reflects_ledger_stats() {
        let Json(body) = stats(State(testing::state_with_reward())).await.unwrap();
        assert_eq!(body.supply, 250);
        assert_eq!(body.utxos_count, 1);
        assert_eq!(body.nice_hashes_count, 1);
        assert_eq!(body.max_zero, 7);
        assert_eq!(body.last_parsed_block, Some(69_000));
    }
}
