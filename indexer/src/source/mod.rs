//! Block sources.
//!
//! A block source answers two questions: "what is the current tip height?"
//! and "give me the normalized block at height H". Every source talks to
//! the node over the same JSON-RPC transport ([`rpc::RpcClient`]); they
//! differ in how the block body is obtained:
//!
//! - [`RawRpcSource`]: the node decodes the block (`getblock <hash> 2`),
//! - [`NativeSource`]: the raw block is decoded locally (`getblock <hash> 0`),
//! - [`ChainSource::Hybrid`]: native below a height threshold, raw above.
//!
//! The fetch pipeline is generic over [`BlockSource`], so tests can plug in
//! an in-memory chain.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::types::{Amount, Block, Height};

#[cfg(test)]
pub(crate) mod mock;
pub mod native;
pub mod raw_rpc;
pub mod rpc;

pub use native::NativeSource;
pub use raw_rpc::RawRpcSource;
pub use rpc::{RpcClient, RpcConfig};

/// Errors raised while talking to the node.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network or HTTP-level failure.
    #[error("transport: {0}")]
    Transport(String),
    /// The node answered with an RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The requested height does not exist yet.
    #[error("height {height} is beyond the chain tip")]
    BeyondTip { height: Height },
    /// The node's answer could not be interpreted.
    #[error("decode: {0}")]
    Decode(String),
}

/// Capability interface of a block source.
pub trait BlockSource: Send + Sync + 'static {
    /// Height of the node's best block.
    fn tip_height(&self) -> impl Future<Output = Result<Height, SourceError>> + Send;

    /// Normalized block at `height`.
    fn fetch_block(&self, height: Height) -> impl Future<Output = Result<Block, SourceError>> + Send;

    /// Alternate source to switch to when this one stops producing blocks.
    fn fallback(&self) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// How blocks are obtained from the node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Native decoding below a height threshold, raw RPC from there on.
    #[default]
    Auto,
    RawRpc,
    Native,
}

/// The concrete source variants.
#[derive(Clone, Debug)]
pub enum ChainSource {
    RawRpc(RawRpcSource),
    /// Native decoding; `raw` is kept as the fallback.
    NativeIndexer { native: NativeSource, raw: RawRpcSource },
    /// Native below `native_until`, raw RPC at and above it.
    Hybrid {
        native: NativeSource,
        raw: RawRpcSource,
        native_until: Height,
    },
}

impl ChainSource {
    /// Builds the variant selected by `kind` over one shared RPC client.
    pub fn new(kind: SourceKind, rpc: RpcClient, unit: Amount, native_until: Height) -> Self {
        let raw = RawRpcSource::new(rpc.clone(), unit);
        let native = NativeSource::new(rpc);
        match kind {
            SourceKind::RawRpc => ChainSource::RawRpc(raw),
            SourceKind::Native => ChainSource::NativeIndexer { native, raw },
            SourceKind::Auto => ChainSource::Hybrid {
                native,
                raw,
                native_until,
            },
        }
    }
}

impl BlockSource for ChainSource {
    async fn tip_height(&self) -> Result<Height, SourceError> {
        match self {
            ChainSource::RawRpc(raw) => raw.tip_height().await,
            ChainSource::NativeIndexer { native, .. } | ChainSource::Hybrid { native, .. } => {
                native.tip_height().await
            }
        }
    }

    async fn fetch_block(&self, height: Height) -> Result<Block, SourceError> {
        match self {
            ChainSource::RawRpc(raw) => raw.fetch_block(height).await,
            ChainSource::NativeIndexer { native, .. } => native.fetch_block(height).await,
            ChainSource::Hybrid {
                native,
                raw,
                native_until,
            } => {
                if height < *native_until {
                    native.fetch_block(height).await
                } else {
                    raw.fetch_block(height).await
                }
            }
        }
    }

    fn fallback(&self) -> Option<Self> {
        match self {
            ChainSource::RawRpc(_) => None,
            ChainSource::NativeIndexer { raw, .. } | ChainSource::Hybrid { raw, .. } => {
                Some(ChainSource::RawRpc(raw.clone()))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ChainSource::RawRpc(_) => "raw-rpc",
            ChainSource::NativeIndexer { .. } => "native",
            ChainSource::Hybrid { .. } => "hybrid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc() -> RpcClient {
        RpcClient::new(&RpcConfig::default()).expect("client builds")
    }

    #[test]
    fn kind_selects_variant() {
        assert_eq!(
            ChainSource::new(SourceKind::RawRpc, rpc(), 100_000_000, 1074).name(),
            "raw-rpc"
        );
        assert_eq!(
            ChainSource::new(SourceKind::Native, rpc(), 100_000_000, 1074).name(),
            "native"
        );
        assert_eq!(
            ChainSource::new(SourceKind::Auto, rpc(), 100_000_000, 1074).name(),
            "hybrid"
        );
    }

    #[test]
    fn only_native_variants_fall_back() {
        let raw = ChainSource::new(SourceKind::RawRpc, rpc(), 100_000_000, 0);
        assert!(raw.fallback().is_none());

        let hybrid = ChainSource::new(SourceKind::Auto, rpc(), 100_000_000, 1074);
        let fallback = hybrid.fallback().expect("hybrid falls back");
        assert_eq!(fallback.name(), "raw-rpc");
        assert!(fallback.fallback().is_none());
    }

    #[test]
    fn source_kind_uses_kebab_case() {
        let kind: SourceKind = serde_json::from_str("\"raw-rpc\"").unwrap();
        assert_eq!(kind, SourceKind::RawRpc);
    }
}
