//! API gateway configuration.
//!
//! The gateway reads the same TOML file as the indexer. Indexer sections
//! are handled by [`IndexerConfig`]; this module only owns the optional
//! `[gateway]` table:
//!
//! ```toml
//! [gateway]
//! listen_addr = "0.0.0.0:8081"
//! explorer_url = "https://b1texplorer.com"
//! explorer_timeout_secs = 10
//! ingest = true
//! reader_refresh_ms = 2000
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use nice_indexer::{ConfigError, IndexerConfig};

/// Configuration for the API gateway HTTP server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Block explorer used to resolve addresses to outputs.
    pub explorer_url: String,
    pub explorer_timeout_secs: u64,
    /// Run the ingestion loop inside the gateway process.
    pub ingest: bool,
    /// How often a read-only gateway catches up with the indexer's writes.
    pub reader_refresh_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            explorer_url: "https://b1texplorer.com".to_string(),
            explorer_timeout_secs: 10,
            ingest: true,
            reader_refresh_ms: 2000,
        }
    }
}

impl ApiConfig {
    pub fn explorer_timeout(&self) -> Duration {
        Duration::from_secs(self.explorer_timeout_secs)
    }

    pub fn reader_refresh(&self) -> Duration {
        Duration::from_millis(self.reader_refresh_ms.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    gateway: ApiConfig,
}

/// Loads both halves of the configuration from one file, or the defaults.
pub fn load(path: Option<&Path>) -> Result<(IndexerConfig, ApiConfig), ConfigError> {
    let Some(path) = path else {
        return Ok((IndexerConfig::default(), ApiConfig::default()));
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml_str(&text)
}

fn from_toml_str(text: &str) -> Result<(IndexerConfig, ApiConfig), ConfigError> {
    let indexer = IndexerConfig::from_toml_str(text)?;
    let file: GatewayFile = toml::from_str(text)?;
    Ok((indexer, file.gateway))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_table_sits_next_to_indexer_sections() {
        let (indexer, api) = from_toml_str(
            r#"
            network = "regtest"

            [storage]
            shard_count = 4

            [gateway]
            listen_addr = "127.0.0.1:3000"
            ingest = false
            reader_refresh_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(indexer.storage.shard_count, 4);
        assert_eq!(api.listen_addr.port(), 3000);
        assert!(!api.ingest);
        assert_eq!(api.reader_refresh(), Duration::from_millis(500));
        assert_eq!(api.explorer_url, "https://b1texplorer.com");
    }

    #[test]
    fn missing_gateway_table_uses_defaults() {
        let (_, api) = from_toml_str("network = \"mainnet\"").unwrap();
        assert_eq!(api.listen_addr.port(), 8081);
        assert!(api.ingest);
    }
}
