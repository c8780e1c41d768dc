//! Ledger contracts used by the protocol engine and the read side.

use super::StorageError;
use crate::types::{Amount, BlockHash, Height, LedgerStats, NiceHashEvent, TxId, UtxoId};

/// Write side of the balance ledger.
///
/// Mutations are bracketed: every `pop_balance` / `add_balance` happens
/// inside `start_transaction` / `end_transaction`, which in turn happen
/// inside `start_block` / `end_block`. `end_block` makes the whole block
/// durable together with the cursor, or nothing at all.
pub trait LedgerStore {
    /// Opens a block. When a cursor exists `height` must be `cursor + 1`.
    fn start_block(&mut self, height: Height, block_hash: &BlockHash) -> Result<(), StorageError>;

    /// Commits the open block and advances the cursor to its height.
    fn end_block(&mut self) -> Result<(), StorageError>;

    /// Discards every staged mutation of the open block, if any.
    fn abort_block(&mut self);

    /// Opens a transaction scope. A positive `reward` records a nice-hash
    /// event when the transaction closes.
    fn start_transaction(&mut self, tx_id: &TxId, reward: Amount) -> Result<(), StorageError>;

    fn end_transaction(&mut self) -> Result<(), StorageError>;

    /// Reads and zeroes the balance of `utxo_id`, returning 0 if absent.
    fn pop_balance(&mut self, utxo_id: &UtxoId) -> Result<Amount, StorageError>;

    /// Credits `amount` to `utxo_id`, creating the entry if needed.
    fn add_balance(&mut self, utxo_id: &UtxoId, amount: Amount) -> Result<(), StorageError>;

    /// Reverts the block at `height`, which must be the cursor, and moves
    /// the cursor to `height - 1`.
    fn rollback_block(&mut self, height: Height) -> Result<(), StorageError>;

    /// Durable resume cursor: height of the last committed block.
    fn last_indexed_block(&self) -> Result<Option<Height>, StorageError>;

    /// Flushes and releases the backend. Further mutations fail.
    fn close(&mut self) -> Result<(), StorageError>;
}

impl<L: LedgerStore + ?Sized> LedgerStore for Box<L> {
    fn start_block(&mut self, height: Height, block_hash: &BlockHash) -> Result<(), StorageError> {
        (**self).start_block(height, block_hash)
    }

    fn end_block(&mut self) -> Result<(), StorageError> {
        (**self).end_block()
    }

    fn abort_block(&mut self) {
        (**self).abort_block()
    }

    fn start_transaction(&mut self, tx_id: &TxId, reward: Amount) -> Result<(), StorageError> {
        (**self).start_transaction(tx_id, reward)
    }

    fn end_transaction(&mut self) -> Result<(), StorageError> {
        (**self).end_transaction()
    }

    fn pop_balance(&mut self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        (**self).pop_balance(utxo_id)
    }

    fn add_balance(&mut self, utxo_id: &UtxoId, amount: Amount) -> Result<(), StorageError> {
        (**self).add_balance(utxo_id, amount)
    }

    fn rollback_block(&mut self, height: Height) -> Result<(), StorageError> {
        (**self).rollback_block(height)
    }

    fn last_indexed_block(&self) -> Result<Option<Height>, StorageError> {
        (**self).last_indexed_block()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        (**self).close()
    }
}

/// Read side of the ledger, safe to share with request handlers.
pub trait LedgerReader: Send + Sync {
    /// Committed balance of `utxo_id` (0 if absent).
    fn balance(&self, utxo_id: &UtxoId) -> Result<Amount, StorageError>;

    /// Most recent nice-hash events, newest first.
    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError>;

    fn stats(&self) -> Result<LedgerStats, StorageError>;

    /// Highest height present in the block log.
    fn max_height(&self) -> Result<Option<Height>, StorageError>;
}

impl<R: LedgerReader + ?Sized> LedgerReader for std::sync::Arc<R> {
    fn balance(&self, utxo_id: &UtxoId) -> Result<Amount, StorageError> {
        (**self).balance(utxo_id)
    }

    fn latest_nice_hashes(&self, limit: usize) -> Result<Vec<NiceHashEvent>, StorageError> {
        (**self).latest_nice_hashes(limit)
    }

    fn stats(&self) -> Result<LedgerStats, StorageError> {
        (**self).stats()
    }

    fn max_height(&self) -> Result<Option<Height>, StorageError> {
        (**self).max_height()
    }
}
