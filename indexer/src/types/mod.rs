//! Core domain types used by the indexer.
//!
//! This module defines strongly-typed identifiers (transaction ids, block
//! hashes, UTXO keys) and the normalized block representation handed from
//! a block source to the protocol engine. The goal is to avoid "naked"
//! byte buffers in public APIs and instead use domain-specific newtypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Normalized block and transaction types.
pub mod block;
/// Ledger-side records: nice-hash events and aggregate stats.
pub mod record;

pub use block::{Block, OutPoint, Transaction, Vin, Vout};
pub use record::{LedgerStats, NiceHashEvent};

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Length in bytes of a [`UtxoId`].
pub const UTXO_ID_LEN: usize = 8;

/// Token balance in atomic units.
pub type Amount = u64;

/// Block height along the canonical chain.
pub type Height = u64;

/// Error returned when parsing a hex-encoded identifier fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

/// Fixed-size 256-bit hash stored in canonical (internal) byte order.
///
/// Block explorers and node RPCs display these hashes byte-reversed; use
/// [`Hash256::to_display_hex`] and [`Hash256::from_display_hex`] at the
/// edges and keep the canonical bytes everywhere else.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Returns the underlying 32-byte array in canonical order.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Parses a display (big-endian) hex string into canonical bytes.
    pub fn from_display_hex(s: &str) -> Result<Self, ParseIdError> {
        let mut bytes = hex::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(ParseIdError::Length {
                expected: HASH_LEN,
                got: bytes.len(),
            });
        }
        bytes.reverse();
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Renders the hash in display (big-endian) hex.
    pub fn to_display_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

/// Transaction identifier in canonical byte order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TxId(pub Hash256);

impl TxId {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(Hash256(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    /// Number of consecutive leading `'0'` characters in the display hex.
    ///
    /// The display form is the canonical bytes reversed, so the scan walks
    /// the canonical bytes from the end.
    pub fn leading_zero_count(&self) -> u8 {
        let mut count: u8 = 0;
        for &byte in self.as_bytes().iter().rev() {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
        count
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_display_hex())
    }
}

impl FromStr for TxId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_display_hex(s).map(TxId)
    }
}

/// Block hash in canonical byte order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub Hash256);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_display_hex())
    }
}

impl FromStr for BlockHash {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_display_hex(s).map(BlockHash)
    }
}

/// 8-byte ledger key identifying a transaction output.
///
/// Derived from `(tx_id, output_index)` with xxh3-64 over the canonical
/// transaction id bytes followed by the index as a little-endian `u64`.
/// This key, not the outpoint itself, is the ledger's primary key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoId(pub [u8; UTXO_ID_LEN]);

impl UtxoId {
    /// Derives the ledger key for output `index` of transaction `tx_id`.
    pub fn derive(tx_id: &TxId, index: u32) -> Self {
        let mut payload = [0u8; HASH_LEN + 8];
        payload[..HASH_LEN].copy_from_slice(tx_id.as_bytes());
        payload[HASH_LEN..].copy_from_slice(&u64::from(index).to_le_bytes());
        Self(xxh3_64(&payload).to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; UTXO_ID_LEN] {
        &self.0
    }

    /// Parses an 8-byte key from a raw slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
        let arr: [u8; UTXO_ID_LEN] = bytes.try_into().map_err(|_| ParseIdError::Length {
            expected: UTXO_ID_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for UtxoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_id(byte: u8) -> TxId {
        TxId::from_bytes([byte; HASH_LEN])
    }

    #[test]
    fn utxo_id_is_deterministic_and_distinguishes_outpoints() {
        let a0 = UtxoId::derive(&tx_id(0x01), 0);
        let a0_again = UtxoId::derive(&tx_id(0x01), 0);
        let a1 = UtxoId::derive(&tx_id(0x01), 1);
        let b0 = UtxoId::derive(&tx_id(0xff), 0);

        assert_eq!(a0, a0_again);
        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
    }

    #[test]
    fn utxo_id_hashes_txid_then_le_index() {
        let id = tx_id(0x42);
        let mut payload = id.as_bytes().to_vec();
        payload.extend_from_slice(&7u64.to_le_bytes());
        let expected = xxh3_64(&payload).to_le_bytes();

        assert_eq!(UtxoId::derive(&id, 7).0, expected);
    }

    #[test]
    fn leading_zero_count_reads_display_order() {
        assert_eq!(tx_id(0x00).leading_zero_count(), 64);

        let mut half = [0xffu8; HASH_LEN];
        half[31] = 0x0f;
        assert_eq!(TxId::from_bytes(half).leading_zero_count(), 1);

        let mut trailing = [0xffu8; HASH_LEN];
        trailing[0] = 0x00;
        assert_eq!(TxId::from_bytes(trailing).leading_zero_count(), 0);
    }

    #[test]
    fn display_hex_is_byte_reversed() {
        let display = "000000abcdef0000000000000000000000000000000000000000000000000001";
        let parsed: TxId = display.parse().expect("valid txid");

        assert_eq!(parsed.as_bytes()[0], 0x01);
        assert_eq!(parsed.as_bytes()[31], 0x00);
        assert_eq!(parsed.to_string(), display);
        assert_eq!(parsed.leading_zero_count(), 6);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "abcd".parse::<TxId>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::Length {
                expected: HASH_LEN,
                got: 2
            }
        );
        assert!(UtxoId::from_slice(&[1, 2, 3]).is_err());
    }
}
