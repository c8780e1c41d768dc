//! Normalized block types.
//!
//! A block source hands the pipeline one [`Block`] per height. Everything
//! the protocol engine needs is precomputed here: per-transaction zero-run
//! length, the block-wide maximum, and the [`UtxoId`] of every input and
//! output. Blocks are immutable once built.

use serde::{Deserialize, Serialize};

use super::{Amount, BlockHash, Height, TxId, UtxoId};

/// Reference to a previous transaction output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }

    /// Ledger key of the referenced output.
    pub fn utxo_id(&self) -> UtxoId {
        UtxoId::derive(&self.tx_id, self.index)
    }
}

/// Transaction input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Vin {
    /// Coinbase marker: no real prior output.
    Coinbase,
    /// Spend of a previous output.
    Spend { prevout: OutPoint, utxo_id: UtxoId },
}

impl Vin {
    /// Builds a spend input, deriving its ledger key from the outpoint.
    pub fn spend(prevout: OutPoint) -> Self {
        Vin::Spend {
            utxo_id: prevout.utxo_id(),
            prevout,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Vin::Coinbase)
    }

    pub fn utxo_id(&self) -> Option<UtxoId> {
        match self {
            Vin::Coinbase => None,
            Vin::Spend { utxo_id, .. } => Some(*utxo_id),
        }
    }
}

/// Transaction output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vout {
    /// Output index within the transaction.
    pub n: u32,
    /// Output value in the chain's atomic units.
    pub value: Amount,
    /// `true` for unspendable, data-carrying outputs.
    pub is_op_return: bool,
    pub utxo_id: UtxoId,
}

impl Vout {
    /// Builds output `n` of `tx_id`, deriving its ledger key.
    pub fn new(tx_id: &TxId, n: u32, value: Amount, is_op_return: bool) -> Self {
        Self {
            n,
            value,
            is_op_return,
            utxo_id: UtxoId::derive(tx_id, n),
        }
    }
}

/// Normalized transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: TxId,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
    /// Leading `'0'` characters of the display transaction id.
    pub zero_count: u8,
}

impl Transaction {
    /// Builds a transaction and computes its zero-run from `tx_id`.
    pub fn new(tx_id: TxId, vin: Vec<Vin>, vout: Vec<Vout>) -> Self {
        Self {
            zero_count: tx_id.leading_zero_count(),
            tx_id,
            vin,
            vout,
        }
    }

    /// A transaction whose first input is the coinbase marker.
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().is_some_and(Vin::is_coinbase)
    }

    /// Outputs that can carry a balance, in output order.
    pub fn eligible_outputs(&self) -> impl Iterator<Item = &Vout> {
        self.vout.iter().filter(|out| !out.is_op_return)
    }
}

/// Normalized block as produced by a block source.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: Height,
    pub block_hash: BlockHash,
    pub transactions: Vec<Transaction>,
    /// Maximum `zero_count` over the contained transactions.
    pub max_zero_count: u8,
}

impl Block {
    /// Builds a block, computing `max_zero_count` from its transactions.
    pub fn new(height: Height, block_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        let max_zero_count = transactions
            .iter()
            .map(|tx| tx.zero_count)
            .max()
            .unwrap_or(0);
        Self {
            height,
            block_hash,
            transactions,
            max_zero_count,
        }
    }
}
