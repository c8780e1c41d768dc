//! Block explorer client.
//!
//! The ledger is keyed by output, not by address, so balances of an address
//! are found by asking an explorer for the address's recent transactions,
//! keeping the nice ones, and collecting their unspent outputs that pay the
//! address.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use nice_indexer::{AddressParams, OutPoint, TxId};

/// Transactions requested per address.
const ADDRESS_TX_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("not a base58check string")]
    Encoding,
    #[error("unexpected payload length {0}")]
    Length(usize),
    #[error("version byte {0} does not belong to this network")]
    Version(u8),
}

/// Checks `address` is a base58check P2PKH or P2SH address of the
/// configured network.
pub fn validate_address(address: &str, params: &AddressParams) -> Result<(), AddressError> {
    let payload = bitcoin::base58::decode_check(address).map_err(|_| AddressError::Encoding)?;
    if payload.len() != 21 {
        return Err(AddressError::Length(payload.len()));
    }
    if !params.accepts(payload[0]) {
        return Err(AddressError::Version(payload[0]));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AddressTx {
    txid: Option<String>,
    hash: Option<String>,
}

impl AddressTx {
    fn id(&self) -> Option<&str> {
        self.txid.as_deref().or(self.hash.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerTx {
    #[serde(default)]
    vout: Vec<ExplorerVout>,
}

#[derive(Debug, Deserialize)]
struct ExplorerVout {
    n: u32,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: ExplorerScript,
    #[serde(rename = "spentTxId", default)]
    spent_tx_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExplorerScript {
    #[serde(default)]
    addresses: Vec<String>,
}

/// Transaction ids in `entries` whose display form starts with
/// `min_zero_count` zeros, in explorer order.
fn nice_txids(entries: &[AddressTx], min_zero_count: u8) -> Vec<String> {
    let prefix = "0".repeat(usize::from(min_zero_count));
    entries
        .iter()
        .filter_map(AddressTx::id)
        .filter(|id| id.starts_with(&prefix))
        .map(str::to_owned)
        .collect()
}

/// Indexes of unspent outputs of `tx` paying `address`.
fn unspent_outputs_to(tx: &ExplorerTx, address: &str) -> Vec<u32> {
    tx.vout
        .iter()
        .filter(|out| out.spent_tx_id.is_none())
        .filter(|out| out.script_pub_key.addresses.iter().any(|a| a == address))
        .map(|out| out.n)
        .collect()
}

#[derive(Clone, Debug)]
pub struct ExplorerClient {
    base_url: String,
    client: Client,
}

impl ExplorerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExplorerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Candidate outpoints of `address` that may carry a balance.
    ///
    /// A failure to list the address's transactions is an error; a failure
    /// to fetch one of them only skips that transaction.
    pub async fn address_outpoints(
        &self,
        address: &str,
        min_zero_count: u8,
    ) -> Result<Vec<OutPoint>, ExplorerError> {
        let url = format!(
            "{}/ext/getaddresstxs/{address}/0/{ADDRESS_TX_LIMIT}",
            self.base_url
        );
        let entries: Vec<AddressTx> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut outpoints = Vec::new();
        for txid_str in nice_txids(&entries, min_zero_count) {
            let tx_id: TxId = match txid_str.parse() {
                Ok(id) => id,
                Err(e) => {
                    debug!(txid = %txid_str, error = %e, "explorer returned a malformed txid");
                    continue;
                }
            };
            let tx = match self.raw_transaction(&txid_str).await {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(txid = %txid_str, error = %e, "skipping transaction");
                    continue;
                }
            };
            outpoints.extend(
                unspent_outputs_to(&tx, address)
                    .into_iter()
                    .map(|n| OutPoint::new(tx_id, n)),
            );
        }
        Ok(outpoints)
    }

    async fn raw_transaction(&self, txid: &str) -> Result<ExplorerTx, ExplorerError> {
        let url = format!("{}/api/getrawtransaction", self.base_url);
        Ok(self
            .client
            .get(&url)
            .query(&[("txid", txid), ("decrypt", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nice_indexer::Network;

    const GENESIS_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[test]
    fn addresses_are_checked_against_network_versions() {
        let mainnet = AddressParams::for_network(Network::Mainnet);
        let testnet = AddressParams::for_network(Network::Testnet);

        assert_eq!(validate_address(GENESIS_ADDRESS, &mainnet), Ok(()));
        assert_eq!(
            validate_address(GENESIS_ADDRESS, &testnet),
            Err(AddressError::Version(0))
        );
        assert_eq!(
            validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb", &mainnet),
            Err(AddressError::Encoding)
        );
        assert_eq!(validate_address("", &mainnet), Err(AddressError::Encoding));
    }

    #[test]
    fn only_nice_transactions_are_kept() {
        let entries: Vec<AddressTx> = serde_json::from_str(
            r#"[
                {"txid": "00000abc"},
                {"hash": "0000000f"},
                {"txid": "0001ffff"},
                {"amount": 3}
            ]"#,
        )
        .unwrap();

        assert_eq!(nice_txids(&entries, 5), vec!["00000abc", "0000000f"]);
        assert_eq!(nice_txids(&entries, 3).len(), 3);
    }

    #[test]
    fn spent_and_foreign_outputs_are_ignored() {
        let tx: ExplorerTx = serde_json::from_str(&format!(
            r#"{{"vout": [
                {{"n": 0, "value": 1.0, "scriptPubKey": {{"addresses": ["{GENESIS_ADDRESS}"]}}}},
                {{"n": 1, "value": 2.0, "scriptPubKey": {{"addresses": ["{GENESIS_ADDRESS}"]}}, "spentTxId": "ab"}},
                {{"n": 2, "value": 3.0, "scriptPubKey": {{"addresses": ["someone-else"]}}}},
                {{"n": 3, "value": 0.0, "scriptPubKey": {{"type": "nulldata"}}}},
                {{"n": 4, "value": 4.0, "scriptPubKey": {{"addresses": ["{GENESIS_ADDRESS}"]}}}}
            ]}}"#
        ))
        .unwrap();

        assert_eq!(unspent_outputs_to(&tx, GENESIS_ADDRESS), vec![0, 4]);
    }
}
