//! Block source backed by the node's decoded JSON blocks.

use serde::Deserialize;
use tracing::debug;

use super::native::decode_block_hex;
use super::rpc::RpcClient;
use super::SourceError;
use crate::types::{Amount, Block, BlockHash, Height, OutPoint, Transaction, TxId, Vin, Vout};

/// `scriptPubKey.type` of data-carrying outputs.
const NULLDATA: &str = "nulldata";

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    #[serde(default)]
    pub tx: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTx {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RawVin>,
    #[serde(default)]
    pub vout: Vec<RawVout>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVin {
    pub coinbase: Option<String>,
    pub txid: Option<String>,
    pub vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVout {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RawScript,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawScript {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Fetches blocks with `getblock <hash> 2`, falling back to the raw
/// serialized block when the node cannot decode it.
#[derive(Clone, Debug)]
pub struct RawRpcSource {
    rpc: RpcClient,
    unit: Amount,
}

impl RawRpcSource {
    /// `unit` is the number of atomic units per coin in RPC `value` fields.
    pub fn new(rpc: RpcClient, unit: Amount) -> Self {
        Self { rpc, unit }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub async fn tip_height(&self) -> Result<Height, SourceError> {
        self.rpc.block_count().await
    }

    pub async fn fetch_block(&self, height: Height) -> Result<Block, SourceError> {
        let hash = self.rpc.block_hash(height).await?;
        let block_hash: BlockHash = hash
            .parse()
            .map_err(|e| SourceError::Decode(format!("block hash {hash}: {e}")))?;

        match self.rpc.block_verbose::<RawBlock>(&hash).await {
            Ok(raw) => normalize_block(raw, height, block_hash, self.unit),
            Err(SourceError::Rpc { code, message }) => {
                debug!(height, code, %message, "verbose getblock failed; decoding raw block");
                let hex = self.rpc.block_hex(&hash).await?;
                decode_block_hex(&hex, height, block_hash)
            }
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn normalize_block(
    raw: RawBlock,
    height: Height,
    block_hash: BlockHash,
    unit: Amount,
) -> Result<Block, SourceError> {
    let transactions = raw
        .tx
        .into_iter()
        .map(|tx| normalize_transaction(tx, unit))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Block::new(height, block_hash, transactions))
}

fn normalize_transaction(raw: RawTx, unit: Amount) -> Result<Transaction, SourceError> {
    let tx_id = parse_txid(&raw.txid)?;

    let vin = raw
        .vin
        .into_iter()
        .map(|input| -> Result<Vin, SourceError> {
            if input.coinbase.is_some() {
                return Ok(Vin::Coinbase);
            }
            let prev = input
                .txid
                .as_deref()
                .ok_or_else(|| SourceError::Decode(format!("{}: input without txid", raw.txid)))?;
            Ok(Vin::spend(OutPoint::new(parse_txid(prev)?, input.vout.unwrap_or(0))))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let vout = raw
        .vout
        .into_iter()
        .map(|output| -> Result<Vout, SourceError> {
            let is_op_return = output.script_pub_key.kind.as_deref() == Some(NULLDATA);
            let value = to_atomic(output.value, unit)?;
            Ok(Vout::new(&tx_id, output.n, value, is_op_return))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Transaction::new(tx_id, vin, vout))
}

fn parse_txid(display: &str) -> Result<TxId, SourceError> {
    display
        .parse()
        .map_err(|e| SourceError::Decode(format!("txid {display}: {e}")))
}

/// Converts a decimal coin amount to atomic units, rounding to nearest.
fn to_atomic(value: f64, unit: Amount) -> Result<Amount, SourceError> {
    let scaled = (value * unit as f64).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > Amount::MAX as f64 {
        return Err(SourceError::Decode(format!("output value {value} out of range")));
    }
    Ok(scaled as Amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UtxoId;

    const BLOCK_JSON: &str = r#"
    {
      "hash": "00000000000000000001aaaa00000000000000000000000000000000000000ff",
      "height": 69001,
      "tx": [
        {
          "txid": "1111111111111111111111111111111111111111111111111111111111111111",
          "vin": [{ "coinbase": "03a10d01", "sequence": 4294967295 }],
          "vout": [{ "value": 50.0, "n": 0, "scriptPubKey": { "type": "pubkeyhash" } }]
        },
        {
          "txid": "0000000abc000000000000000000000000000000000000000000000000000001",
          "vin": [
            { "txid": "2222222222222222222222222222222222222222222222222222222222222222", "vout": 3 }
          ],
          "vout": [
            { "value": 0.0, "n": 0, "scriptPubKey": { "type": "nulldata" } },
            { "value": 1.23456789, "n": 1, "scriptPubKey": { "type": "pubkeyhash" } },
            { "value": 0.1, "n": 2, "scriptPubKey": { "type": "scripthash" } }
          ]
        }
      ]
    }
    "#;

    #[test]
    fn verbose_block_is_normalized() {
        let raw: RawBlock = serde_json::from_str(BLOCK_JSON).expect("fixture parses");
        let block = normalize_block(raw, 69_001, BlockHash::default(), 100_000_000).unwrap();

        assert_eq!(block.height, 69_001);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.max_zero_count, 7);

        let coinbase = &block.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.vout[0].value, 5_000_000_000);

        let nice = &block.transactions[1];
        assert_eq!(nice.zero_count, 7);
        assert_eq!(
            nice.tx_id.to_string(),
            "0000000abc000000000000000000000000000000000000000000000000000001"
        );
        assert!(nice.vout[0].is_op_return);
        assert_eq!(nice.vout[1].value, 123_456_789);
        assert_eq!(nice.vout[2].value, 10_000_000);

        let prev: TxId = "2222222222222222222222222222222222222222222222222222222222222222"
            .parse()
            .unwrap();
        assert_eq!(nice.vin[0].utxo_id(), Some(UtxoId::derive(&prev, 3)));
    }

    #[test]
    fn malformed_txid_is_a_decode_error() {
        let raw: RawBlock = serde_json::from_str(r#"{"tx": [{"txid": "zz", "vin": [], "vout": []}]}"#)
            .expect("fixture parses");
        assert!(matches!(
            normalize_block(raw, 1, BlockHash::default(), 100_000_000),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn atomic_conversion_rounds_to_nearest() {
        assert_eq!(to_atomic(0.00000001, 100_000_000).unwrap(), 1);
        assert_eq!(to_atomic(0.29, 100_000_000).unwrap(), 29_000_000);
        assert!(to_atomic(-1.0, 100_000_000).is_err());
    }
}
