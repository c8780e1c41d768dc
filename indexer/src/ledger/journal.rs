//! In-memory staging of one block's ledger mutations.
//!
//! Both ledger backends route their write path through a [`BlockJournal`]:
//!
//! - transaction scopes stage writes and are merged into the block scope
//!   at `end_transaction`,
//! - the first read of every key records its committed value (the prior),
//!   which becomes the undo record,
//! - `finish` yields a [`BlockChanges`] that the backend commits in one
//!   step, `abort` drops everything.

use std::collections::BTreeMap;

use tracing::warn;

use super::StorageError;
use crate::types::{Amount, BlockHash, Height, LedgerStats, NiceHashEvent, TxId, UtxoId};

/// Net effect of a block on one ledger entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BalanceChange {
    pub utxo_id: UtxoId,
    /// Committed balance before the block; `None` if the entry was absent.
    pub prior: Option<Amount>,
    /// Balance after the block; 0 removes the entry.
    pub current: Amount,
}

impl BalanceChange {
    fn created(&self) -> bool {
        self.prior.unwrap_or(0) == 0 && self.current > 0
    }

    fn consumed(&self) -> bool {
        self.prior.unwrap_or(0) > 0 && self.current == 0
    }
}

/// Everything a backend must persist for one block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockChanges {
    pub height: Height,
    pub block_hash: BlockHash,
    /// Changed entries, ordered by key.
    pub balances: Vec<BalanceChange>,
    /// Rewarded transactions in block order.
    pub events: Vec<NiceHashEvent>,
}

impl BlockChanges {
    /// Rewards minted by this block.
    pub fn minted(&self) -> Result<Amount, StorageError> {
        self.events
            .iter()
            .try_fold(0, |sum: Amount, event| sum.checked_add(event.reward))
            .ok_or(StorageError::Overflow("minted rewards"))
    }

    /// Net change of the balance sum made by this block.
    pub fn balance_delta(&self) -> i128 {
        self.balances
            .iter()
            .map(|c| i128::from(c.current) - i128::from(c.prior.unwrap_or(0)))
            .sum()
    }

    /// Stats after this block, given the stats before it.
    pub fn next_stats(&self, prior: &LedgerStats) -> Result<LedgerStats, StorageError> {
        let created = self.balances.iter().filter(|c| c.created()).count() as u64;
        let consumed = self.balances.iter().filter(|c| c.consumed()).count() as u64;
        let next = prior
            .apply(
                self.height,
                self.minted()?,
                self.balance_delta(),
                (created, consumed),
                &self.events,
            )
            .ok_or(StorageError::Overflow("ledger stats"))?;
        if prior.is_conserved() && !next.is_conserved() {
            warn!(
                height = self.height,
                supply = next.supply,
                supply_check = next.supply_check,
                "balance sum diverged from minted supply"
            );
        }
        Ok(next)
    }
}

#[derive(Debug)]
struct TxScope {
    tx_id: TxId,
    reward: Amount,
    writes: BTreeMap<UtxoId, Amount>,
}

#[derive(Debug)]
struct OpenBlock {
    height: Height,
    block_hash: BlockHash,
    writes: BTreeMap<UtxoId, Amount>,
    priors: BTreeMap<UtxoId, Option<Amount>>,
    events: Vec<NiceHashEvent>,
    tx: Option<TxScope>,
}

/// Block/transaction bracketing and staging shared by the ledger backends.
#[derive(Debug, Default)]
pub struct BlockJournal {
    open: Option<OpenBlock>,
}

impl BlockJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens a block. `cursor` is the backend's last committed height.
    pub fn start_block(
        &mut self,
        height: Height,
        block_hash: &BlockHash,
        cursor: Option<Height>,
    ) -> Result<(), StorageError> {
        if let Some(open) = &self.open {
            return Err(StorageError::BlockAlreadyOpen {
                height: open.height,
            });
        }
        if let Some(cursor) = cursor {
            let expected = cursor + 1;
            if height != expected {
                return Err(StorageError::HeightMismatch {
                    expected,
                    got: height,
                });
            }
        }
        self.open = Some(OpenBlock {
            height,
            block_hash: *block_hash,
            writes: BTreeMap::new(),
            priors: BTreeMap::new(),
            events: Vec::new(),
            tx: None,
        });
        Ok(())
    }

    pub fn start_transaction(&mut self, tx_id: &TxId, reward: Amount) -> Result<(), StorageError> {
        let open = self.open.as_mut().ok_or(StorageError::NoOpenBlock)?;
        if open.tx.is_some() {
            return Err(StorageError::TransactionAlreadyOpen);
        }
        open.tx = Some(TxScope {
            tx_id: *tx_id,
            reward,
            writes: BTreeMap::new(),
        });
        Ok(())
    }

    pub fn end_transaction(&mut self) -> Result<(), StorageError> {
        let open = self.open.as_mut().ok_or(StorageError::NoOpenBlock)?;
        let tx = open.tx.take().ok_or(StorageError::NoOpenTransaction)?;
        open.writes.extend(tx.writes);
        if tx.reward > 0 {
            open.events.push(NiceHashEvent {
                height: open.height,
                tx_id: tx.tx_id,
                reward: tx.reward,
            });
        }
        Ok(())
    }

    /// Zeroes `utxo_id` in the open transaction and returns its balance.
    ///
    /// `load` reads the committed value and is called at most once per key
    /// per block.
    pub fn pop_balance<F>(&mut self, utxo_id: &UtxoId, load: F) -> Result<Amount, StorageError>
    where
        F: FnOnce(&UtxoId) -> Result<Option<Amount>, StorageError>,
    {
        let open = self.open.as_mut().ok_or(StorageError::NoOpenBlock)?;
        let OpenBlock {
            writes, priors, tx, ..
        } = open;
        let tx = tx.as_mut().ok_or(StorageError::NoOpenTransaction)?;
        let balance = current(&tx.writes, writes, priors, utxo_id, load)?;
        tx.writes.insert(*utxo_id, 0);
        Ok(balance)
    }

    /// Credits `amount` to `utxo_id` in the open transaction.
    pub fn add_balance<F>(
        &mut self,
        utxo_id: &UtxoId,
        amount: Amount,
        load: F,
    ) -> Result<(), StorageError>
    where
        F: FnOnce(&UtxoId) -> Result<Option<Amount>, StorageError>,
    {
        let open = self.open.as_mut().ok_or(StorageError::NoOpenBlock)?;
        let OpenBlock {
            writes, priors, tx, ..
        } = open;
        let tx = tx.as_mut().ok_or(StorageError::NoOpenTransaction)?;
        let balance = current(&tx.writes, writes, priors, utxo_id, load)?;
        let credited = balance
            .checked_add(amount)
            .ok_or(StorageError::Overflow("balance"))?;
        tx.writes.insert(*utxo_id, credited);
        Ok(())
    }

    /// Closes the open block and returns its net changes.
    ///
    /// Entries whose final balance equals their prior are dropped.
    pub fn finish(&mut self) -> Result<BlockChanges, StorageError> {
        match &self.open {
            None => return Err(StorageError::NoOpenBlock),
            Some(open) if open.tx.is_some() => return Err(StorageError::TransactionStillOpen),
            Some(_) => {}
        }
        let open = self.open.take().ok_or(StorageError::NoOpenBlock)?;

        let mut balances = Vec::with_capacity(open.writes.len());
        for (utxo_id, current) in open.writes {
            let prior = open.priors.get(&utxo_id).copied().flatten();
            if prior.unwrap_or(0) == current {
                continue;
            }
            balances.push(BalanceChange {
                utxo_id,
                prior,
                current,
            });
        }

        Ok(BlockChanges {
            height: open.height,
            block_hash: open.block_hash,
            balances,
            events: open.events,
        })
    }

    /// Drops the open block. Returns its height if one was open.
    pub fn abort(&mut self) -> Option<Height> {
        self.open.take().map(|open| open.height)
    }
}

fn current<F>(
    tx_writes: &BTreeMap<UtxoId, Amount>,
    block_writes: &BTreeMap<UtxoId, Amount>,
    priors: &mut BTreeMap<UtxoId, Option<Amount>>,
    utxo_id: &UtxoId,
    load: F,
) -> Result<Amount, StorageError>
where
    F: FnOnce(&UtxoId) -> Result<Option<Amount>, StorageError>,
{
    if let Some(value) = tx_writes.get(utxo_id).or_else(|| block_writes.get(utxo_id)) {
        return Ok(*value);
    }
    if let Some(prior) = priors.get(utxo_id) {
        return Ok(prior.unwrap_or(0));
    }
    let prior = load(utxo_id)?;
    priors.insert(*utxo_id, prior);
    Ok(prior.unwrap_or(0))
}
