use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Amount, Height};

/// Chain the indexer follows.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network `{other}`")),
        }
    }
}

/// Reward protocol parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Minimum zero-run for a transaction to earn anything.
    pub min_zero_count: u8,
    /// Reward of the block's best transaction, in atomic units.
    pub max_reward: Amount,
    /// Atomic units per whole coin of the underlying chain.
    pub unit: Amount,
    /// First height indexed on an empty ledger.
    pub start_height: Height,
}

impl ProtocolParams {
    /// Preset parameters for `network`.
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                min_zero_count: 5,
                max_reward: 100_000_000,
                unit: 100_000_000,
                start_height: 69_000,
            },
            Network::Testnet | Network::Regtest => Self {
                min_zero_count: 2,
                max_reward: 100_000_000,
                unit: 100_000_000,
                start_height: 0,
            },
        }
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parses_case_insensitively() {
        assert_eq!("Mainnet".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("regtest".parse::<Network>(), Ok(Network::Regtest));
        assert!("signet".parse::<Network>().is_err());
        assert_eq!(Network::Testnet.to_string(), "testnet");
    }

    #[test]
    fn presets_differ_by_network() {
        let main = ProtocolParams::for_network(Network::Mainnet);
        assert_eq!(main.min_zero_count, 5);
        assert_eq!(main.start_height, 69_000);

        let reg = ProtocolParams::for_network(Network::Regtest);
        assert_eq!(reg.min_zero_count, 2);
        assert_eq!(reg.start_height, 0);
        assert_eq!(reg.max_reward, main.max_reward);
    }
}
