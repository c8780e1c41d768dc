use serde::{Deserialize, Serialize};

use super::{Amount, Height, TxId};

/// A transaction that received a positive reward.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NiceHashEvent {
    pub height: Height,
    pub tx_id: TxId,
    pub reward: Amount,
}

impl NiceHashEvent {
    /// Zero-run of the rewarded transaction id.
    pub fn zero_count(&self) -> u8 {
        self.tx_id.leading_zero_count()
    }
}

/// Aggregate counters maintained alongside the balances.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Total minted rewards.
    pub supply: Amount,
    /// Sum of all balances, tracked from the balance changes themselves.
    /// Equals `supply` as long as no value is created or lost outside minting.
    pub supply_check: Amount,
    /// Entries currently holding a positive balance.
    pub utxos_count: u64,
    /// Number of rewarded transactions.
    pub nice_hashes_count: u64,
    /// Largest zero-run among rewarded transactions.
    pub max_zero: u8,
    /// Height of the last applied block, if any.
    pub last_parsed_block: Option<Height>,
}

impl LedgerStats {
    /// Stats after applying one block's net effects.
    ///
    /// `balance_delta` is the block's net change of the balance sum.
    /// Returns `None` if a counter would leave its range.
    pub fn apply(
        &self,
        height: Height,
        minted: Amount,
        balance_delta: i128,
        (created, consumed): (u64, u64),
        events: &[NiceHashEvent],
    ) -> Option<Self> {
        let max_zero = events
            .iter()
            .map(NiceHashEvent::zero_count)
            .fold(self.max_zero, u8::max);
        let supply_check = i128::from(self.supply_check)
            .checked_add(balance_delta)
            .and_then(|sum| Amount::try_from(sum).ok())?;
        Some(Self {
            supply: self.supply.checked_add(minted)?,
            supply_check,
            utxos_count: self.utxos_count.checked_add(created)?.checked_sub(consumed)?,
            nice_hashes_count: self.nice_hashes_count + events.len() as u64,
            max_zero,
            last_parsed_block: Some(height),
        })
    }

    /// True while the tracked balance sum matches the minted supply.
    pub fn is_conserved(&self) -> bool {
        self.supply == self.supply_check
    }
}
