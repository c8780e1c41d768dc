use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use nice_indexer::{Amount, DEFAULT_NICE_HASH_LIMIT, Height, NiceHashEvent};

use super::{HandlerError, as_internal};
use crate::state::SharedState;

/// Upper bound on `?limit=`.
const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct NiceHashQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NiceHashView {
    pub height: Height,
    pub txid: String,
    pub zero_count: u8,
    pub reward: Amount,
}

impl From<NiceHashEvent> for NiceHashView {
    fn from(event: NiceHashEvent) -> Self {
        Self {
            height: event.height,
            zero_count: event.zero_count(),
            txid: event.tx_id.to_string(),
            reward: event.reward,
        }
    }
}

/// `GET /nicehashes?limit=N`
///
/// Most recent rewarded transactions, newest first.
pub async fn latest(
    State(state): State<SharedState>,
    Query(query): Query<NiceHashQuery>,
) -> Result<Json<Vec<NiceHashView>>, HandlerError> {
    let limit = query.limit.unwrap_or(DEFAULT_NICE_HASH_LIMIT).min(MAX_LIMIT);
    let events = state.query.latest_nice_hashes(limit).map_err(as_internal)?;
    Ok(Json(events.into_iter().map(NiceHashView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing;

    #[tokio::test]
    async fn lists_rewarded_transactions() {
        let Json(body) = latest(
            State(testing::state_with_reward()),
            Query(NiceHashQuery { limit: None }),
        )
        .await
        .unwrap();

        assert_eq!(body.len(), 1);
        assert_eq!(body[0].txid, testing::NICE_TXID);
        assert_eq!(body[0].zero_count, 7);
        assert_eq!(body[0].reward, 250);
        assert_eq!(body[0].height, 69_000);
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let Json(body) = latest(
            State(testing::state_with_reward()),
            Query(NiceHashQuery { limit: Some(0) }),
        )
        .await
        .unwrap();
        assert!(body.is_empty());
    }
}
