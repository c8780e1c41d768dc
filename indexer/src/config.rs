//! Top-level configuration for the indexer.
//!
//! One [`IndexerConfig`] is built at startup, from a TOML file layered over
//! per-network presets, and then handed by reference to whatever needs it.
//! It aggregates:
//!
//! - the node backend (endpoint, credentials, source variant),
//! - the ledger storage (path, shard count, reorg window),
//! - protocol overrides (zero threshold, reward, unit, start height),
//! - fetch pipeline and ingestion loop tuning,
//! - the metrics exporter,
//! - address version bytes used by the read API.
//!
//! Every section and key is optional; missing values fall back to the
//! preset of the selected network.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ingest::IngestConfig;
use crate::ledger::MAX_SHARDS;
use crate::pipeline::{FetcherConfig, FetcherError};
use crate::protocol::{Network, ProtocolParams};
use crate::source::{RpcConfig, SourceKind};
use crate::storage::RocksLedgerConfig;
use crate::types::{Amount, Height};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<FetcherError> for ConfigError {
    fn from(err: FetcherError) -> Self {
        match err {
            FetcherError::InvalidConfig(msg) => ConfigError::Invalid(msg),
        }
    }
}

/// Node RPC endpoint and block source selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub tls_verify: bool,
    pub source: SourceKind,
    /// With `source = "auto"`, heights below this are decoded natively.
    pub native_until_height: Height,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let rpc = RpcConfig::default();
        Self {
            url: rpc.url,
            user: rpc.user,
            password: rpc.password,
            timeout_secs: rpc.timeout.as_secs(),
            tls_verify: rpc.tls_verify,
            source: SourceKind::Auto,
            native_until_height: 1_074,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Ledger directory; a leading `~/` is expanded from `$HOME`.
    pub path: PathBuf,
    pub shard_count: usize,
    pub reorg_window: u64,
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/data/balances"),
            shard_count: 10,
            reorg_window: 100,
            sync_writes: true,
        }
    }
}

/// Per-key overrides of the network's protocol preset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolOverrides {
    pub min_zero_count: Option<u8>,
    pub max_reward: Option<Amount>,
    pub unit: Option<Amount>,
    pub start_height: Option<Height>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherSection {
    pub buffer_capacity: usize,
    pub throttle_at: usize,
    pub batch_size: u64,
    pub enqueue_attempts: u32,
    pub stop_grace_secs: u64,
}

impl Default for FetcherSection {
    fn default() -> Self {
        let fetcher = FetcherConfig::default();
        Self {
            buffer_capacity: fetcher.buffer_capacity,
            throttle_at: fetcher.throttle_at,
            batch_size: fetcher.batch_size,
            enqueue_attempts: fetcher.enqueue_attempts,
            stop_grace_secs: fetcher.stop_grace.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub poll_timeout_ms: u64,
    /// 0 disables switching to the fallback source.
    pub idle_polls_before_fallback: u32,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 500,
            idle_polls_before_fallback: 3,
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Base58check version bytes of the chain's addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AddressParams {
    pub pubkey_hash_version: u8,
    pub script_hash_version: u8,
}

impl AddressParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                pubkey_hash_version: 0,
                script_hash_version: 5,
            },
            Network::Testnet | Network::Regtest => Self {
                pubkey_hash_version: 111,
                script_hash_version: 196,
            },
        }
    }

    pub fn accepts(&self, version: u8) -> bool {
        version == self.pubkey_hash_version || version == self.script_hash_version
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressOverrides {
    pub pubkey_hash_version: Option<u8>,
    pub script_hash_version: Option<u8>,
}

/// Top-level configuration of an indexer process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub network: Network,
    pub backend: BackendConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolOverrides,
    pub fetcher: FetcherSection,
    pub ingest: IngestSection,
    pub metrics: MetricsConfig,
    pub address: AddressOverrides,
}

impl IndexerConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fetcher_config().validate()?;

        let shards = self.storage.shard_count;
        if shards == 0 || shards > MAX_SHARDS {
            return Err(ConfigError::Invalid(format!(
                "storage.shard_count must be in 1..={MAX_SHARDS}, got {shards}"
            )));
        }
        if self.storage.reorg_window == 0 {
            return Err(ConfigError::Invalid(
                "storage.reorg_window must be positive".into(),
            ));
        }
        if self.protocol_params().unit == 0 {
            return Err(ConfigError::Invalid("protocol.unit must be positive".into()));
        }
        if self.ingest.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ingest.poll_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Network preset with the `[protocol]` overrides applied.
    pub fn protocol_params(&self) -> ProtocolParams {
        let preset = ProtocolParams::for_network(self.network);
        let o = &self.protocol;
        ProtocolParams {
            min_zero_count: o.min_zero_count.unwrap_or(preset.min_zero_count),
            max_reward: o.max_reward.unwrap_or(preset.max_reward),
            unit: o.unit.unwrap_or(preset.unit),
            start_height: o.start_height.unwrap_or(preset.start_height),
        }
    }

    pub fn address_params(&self) -> AddressParams {
        let preset = AddressParams::for_network(self.network);
        AddressParams {
            pubkey_hash_version: self
                .address
                .pubkey_hash_version
                .unwrap_or(preset.pubkey_hash_version),
            script_hash_version: self
                .address
                .script_hash_version
                .unwrap_or(preset.script_hash_version),
        }
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.backend.url.clone(),
            user: self.backend.user.clone(),
            password: self.backend.password.clone(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
            tls_verify: self.backend.tls_verify,
        }
    }

    pub fn ledger_config(&self) -> RocksLedgerConfig {
        RocksLedgerConfig {
            path: expand_home(&self.storage.path),
            shard_count: self.storage.shard_count,
            reorg_window: self.storage.reorg_window,
            sync_writes: self.storage.sync_writes,
            create_if_missing: true,
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            buffer_capacity: self.fetcher.buffer_capacity,
            throttle_at: self.fetcher.throttle_at,
            batch_size: self.fetcher.batch_size,
            enqueue_attempts: self.fetcher.enqueue_attempts,
            stop_grace: Duration::from_secs(self.fetcher.stop_grace_secs),
            ..FetcherConfig::default()
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            poll_timeout: Duration::from_millis(self.ingest.poll_timeout_ms),
            idle_polls_before_fallback: self.ingest.idle_polls_before_fallback,
            fetcher: self.fetcher_config(),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_mainnet_preset() {
        let config = IndexerConfig::from_toml_str("").unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.protocol_params(), ProtocolParams::for_network(Network::Mainnet));
        assert_eq!(config.protocol_params().start_height, 69_000);
        assert_eq!(config.address_params().script_hash_version, 5);
        assert_eq!(config.backend.native_until_height, 1_074);
        assert_eq!(config.fetcher_config().throttle_at, 8);
    }

    #[test]
    fn overrides_layer_over_network_preset() {
        let config = IndexerConfig::from_toml_str(
            r#"
            network = "testnet"

            [backend]
            url = "https://node.example:19876"
            source = "raw-rpc"
            tls_verify = true

            [storage]
            path = "/var/lib/nice"
            shard_count = 16

            [protocol]
            max_reward = 42

            [ingest]
            idle_polls_before_fallback = 0

            [metrics]
            listen_addr = "0.0.0.0:9000"
            "#,
        )
        .unwrap();

        let params = config.protocol_params();
        assert_eq!(params.min_zero_count, 2);
        assert_eq!(params.max_reward, 42);
        assert_eq!(params.start_height, 0);
        assert_eq!(config.address_params().pubkey_hash_version, 111);

        assert_eq!(config.backend.source, SourceKind::RawRpc);
        assert!(config.rpc_config().tls_verify);
        assert_eq!(config.ledger_config().path, PathBuf::from("/var/lib/nice"));
        assert_eq!(config.ledger_config().shard_count, 16);
        assert_eq!(config.ingest_config().idle_polls_before_fallback, 0);
        assert_eq!(config.metrics.listen_addr.port(), 9000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            "[fetcher]\nbuffer_capacity = 8\nthrottle_at = 8",
            "[storage]\nshard_count = 0",
            "[storage]\nshard_count = 300",
            "[storage]\nreorg_window = 0",
            "[protocol]\nunit = 0",
        ];
        for case in cases {
            assert!(
                matches!(IndexerConfig::from_toml_str(case), Err(ConfigError::Invalid(_))),
                "accepted: {case}"
            );
        }
        assert!(matches!(
            IndexerConfig::from_toml_str("network = \"moonnet\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn home_prefix_is_expanded() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        let config = IndexerConfig::default();
        assert_eq!(
            config.ledger_config().path,
            PathBuf::from(home).join("data/balances")
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = IndexerConfig::load(Path::new("/nonexistent/nice.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/nice.toml"));
    }
}
