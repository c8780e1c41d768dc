use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use nice_indexer::Height;

use super::{HandlerError, as_internal};
use crate::state::SharedState;

/// Simple health-check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub network: String,
    /// Highest ingested height, `null` on an empty ledger.
    pub height: Option<Height>,
}

/// `GET /health`
///
/// Returns a basic JSON document indicating liveness and ingestion progress.
pub async fn health(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<HealthResponse>), HandlerError> {
    let height = state.query.max_height().map_err(as_internal)?;
    Ok((
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            network: state.network.to_string(),
            height,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing;

    #[tokio::test]
    async fn reports_height() {
        let (status, Json(body)) = health(State(testing::state_with_reward())).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.network, "mainnet");
        assert_eq!(body.height, Some(69_000));
    }
}
