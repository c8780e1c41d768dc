//! Block source decoding raw serialized blocks locally.
//!
//! Blocks are fetched with `getblock <hash> 0` and deserialized with the
//! `bitcoin` crate's consensus codec. Merge-mined (AuxPoW) headers are not
//! decodable this way; those heights go through
//! [`super::RawRpcSource`] instead.

use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::Hash;

use super::SourceError;
use super::rpc::RpcClient;
use crate::types::{Block, BlockHash, Hash256, Height, OutPoint, Transaction, TxId, Vin, Vout};

#[derive(Clone, Debug)]
pub struct NativeSource {
    rpc: RpcClient,
}

impl NativeSource {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    pub async fn tip_height(&self) -> Result<Height, SourceError> {
        self.rpc.block_count().await
    }

    pub async fn fetch_block(&self, height: Height) -> Result<Block, SourceError> {
        let hash = self.rpc.block_hash(height).await?;
        let block_hash: BlockHash = hash
            .parse()
            .map_err(|e| SourceError::Decode(format!("block hash {hash}: {e}")))?;
        let hex = self.rpc.block_hex(&hash).await?;
        decode_block_hex(&hex, height, block_hash)
    }
}

/// Decodes a hex-encoded serialized block into the normalized form.
pub(crate) fn decode_block_hex(
    hex_block: &str,
    height: Height,
    block_hash: BlockHash,
) -> Result<Block, SourceError> {
    let bytes = hex::decode(hex_block.trim())
        .map_err(|e| SourceError::Decode(format!("block {height}: invalid hex: {e}")))?;
    let block: bitcoin::Block = deserialize(&bytes)
        .map_err(|e| SourceError::Decode(format!("block {height}: {e}")))?;
    Ok(normalize(&block, height, block_hash))
}

fn normalize(block: &bitcoin::Block, height: Height, block_hash: BlockHash) -> Block {
    let transactions = block
        .txdata
        .iter()
        .map(|tx| {
            let tx_id = TxId(Hash256(tx.compute_txid().to_byte_array()));
            let coinbase = tx.is_coinbase();

            let vin = tx
                .input
                .iter()
                .enumerate()
                .map(|(i, input)| {
                    if coinbase && i == 0 {
                        return Vin::Coinbase;
                    }
                    let prev = &input.previous_output;
                    let prev_id = TxId(Hash256(prev.txid.to_byte_array()));
                    Vin::spend(OutPoint::new(prev_id, prev.vout))
                })
                .collect();

            let vout = tx
                .output
                .iter()
                .enumerate()
                .map(|(n, output)| {
                    Vout::new(
                        &tx_id,
                        n as u32,
                        output.value.to_sat(),
                        output.script_pubkey.is_op_return(),
                    )
                })
                .collect();

            Transaction::new(tx_id, vin, vout)
        })
        .collect();

    Block::new(height, block_hash, transactions)
}
