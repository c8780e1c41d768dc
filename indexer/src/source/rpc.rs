//! JSON-RPC transport to the chain node.
//!
//! The node speaks the usual `bitcoind` JSON-RPC dialect:
//!
//! ```json
//! POST /
//! { "jsonrpc": "1.0", "id": 7, "method": "getblockhash", "params": [69000] }
//!
//! Response (HTTP 200, or 500 when `error` is set):
//! { "result": "0000...", "error": null, "id": 7 }
//! ```
//!
//! RPC-level failures come back as `{ "code": -8, "message": "..." }` in
//! `error`; they map to [`SourceError::Rpc`], except for the "block height
//! out of range" case which becomes [`SourceError::BeyondTip`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::SourceError;
use crate::types::Height;

/// RPC error code returned for heights past the tip.
pub const RPC_INVALID_PARAMETER: i64 = -8;

/// Connection settings for [`RpcClient`].
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Node endpoint, e.g. `"http://localhost:9876"`.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Verify TLS certificates for `https` endpoints.
    pub tls_verify: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9876".to_string(),
            user: Some("rpc".to_string()),
            password: Some("rpc".to_string()),
            timeout: Duration::from_secs(10),
            tls_verify: false,
        }
    }
}

/// Async JSON-RPC client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RpcClient {
    url: String,
    user: Option<String>,
    password: Option<String>,
    client: Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T, SourceError> {
        if let Some(err) = self.error {
            return Err(SourceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| SourceError::Decode(format!("{method}: response has no result")))
    }
}

impl RpcClient {
    pub fn new(cfg: &RpcConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .danger_accept_invalid_certs(!cfg.tls_verify)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: cfg.url.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            client,
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Calls `method` and decodes its `result`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("{method}: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::Transport(format!(
                "{method}: node rejected credentials ({status})"
            )));
        }

        // Error replies carry HTTP 500 with a JSON body, so parse regardless.
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Transport(format!("{method}: {e}")))?;
        let parsed: RpcResponse<T> = serde_json::from_str(&body).map_err(|e| {
            SourceError::Decode(format!("{method}: invalid response (HTTP {status}): {e}"))
        })?;
        parsed.into_result(method)
    }

    /// Height of the node's best block.
    pub async fn block_count(&self) -> Result<Height, SourceError> {
        self.call("getblockcount", json!([])).await
    }

    /// Display hash of the block at `height`.
    pub async fn block_hash(&self, height: Height) -> Result<String, SourceError> {
        self.call("getblockhash", json!([height]))
            .await
            .map_err(|err| beyond_tip(err, height))
    }

    /// Block at `hash` decoded by the node (`verbosity = 2`).
    pub async fn block_verbose<T: DeserializeOwned>(&self, hash: &str) -> Result<T, SourceError> {
        self.call("getblock", json!([hash, 2])).await
    }

    /// Raw serialized block at `hash`, hex encoded (`verbosity = 0`).
    pub async fn block_hex(&self, hash: &str) -> Result<String, SourceError> {
        self.call("getblock", json!([hash, 0])).await
    }
}

fn beyond_tip(err: SourceError, height: Height) -> SourceError {
    match err {
        SourceError::Rpc { code, .. } if code == RPC_INVALID_PARAMETER => {
            SourceError::BeyondTip { height }
        }
        other => other,
    }
}
