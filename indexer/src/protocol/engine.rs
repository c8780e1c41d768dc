//! Per-block state transition.

use tracing::{debug, info};

use super::params::ProtocolParams;
use super::reward::{calculate_reward, generate_movements};
use crate::ledger::{LedgerStore, StorageError};
use crate::types::{Amount, Block, Height, Transaction, TxId};

/// One rewarded transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardRecord {
    pub tx_id: TxId,
    pub zero_count: u8,
    pub reward: Amount,
}

/// What applying a block did to the ledger.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockSummary {
    pub height: Height,
    pub rewards: Vec<RewardRecord>,
    pub total_reward: Amount,
    /// Inputs that carried a positive balance.
    pub inputs_consumed: u64,
    /// Credits written to outputs.
    pub outputs_credited: u64,
}

/// Applies blocks to a ledger according to the reward protocol.
#[derive(Clone, Debug, Default)]
pub struct ProtocolEngine {
    params: ProtocolParams,
}

impl ProtocolEngine {
    pub fn new(params: ProtocolParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Applies `block` as one atomic ledger block.
    ///
    /// On any error the open block is aborted and nothing is committed.
    pub fn process_block<L>(&self, block: &Block, ledger: &mut L) -> Result<BlockSummary, StorageError>
    where
        L: LedgerStore + ?Sized,
    {
        ledger.start_block(block.height, &block.block_hash)?;

        let result = self
            .apply_transactions(block, ledger)
            .and_then(|summary| ledger.end_block().map(|()| summary));
        if result.is_err() {
            ledger.abort_block();
        }
        result
    }

    fn apply_transactions<L>(&self, block: &Block, ledger: &mut L) -> Result<BlockSummary, StorageError>
    where
        L: LedgerStore + ?Sized,
    {
        let mut summary = BlockSummary {
            height: block.height,
            ..BlockSummary::default()
        };

        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }

            let mut output_values: Vec<Amount> = tx.eligible_outputs().map(|out| out.value).collect();
            if output_values.is_empty() {
                continue;
            }
            if output_values.len() > 1 {
                output_values.pop();
            }

            let reward = self.reward_for(tx, block);
            ledger.start_transaction(&tx.tx_id, reward)?;

            let mut total_in: Amount = 0;
            for utxo_id in tx.vin.iter().filter_map(|vin| vin.utxo_id()) {
                let balance = ledger.pop_balance(&utxo_id)?;
                if balance > 0 {
                    summary.inputs_consumed += 1;
                }
                total_in = total_in
                    .checked_add(balance)
                    .ok_or(StorageError::Overflow("transaction inputs"))?;
            }

            let total = total_in
                .checked_add(reward)
                .ok_or(StorageError::Overflow("transaction value"))?;
            if total > 0 {
                // All-zero weights would strand the value; split evenly instead.
                let weights = if output_values.iter().all(|value| *value == 0) {
                    vec![1; output_values.len()]
                } else {
                    output_values
                };
                for movement in generate_movements(tx, total, &weights) {
                    ledger.add_balance(&movement.utxo_id, movement.amount)?;
                    summary.outputs_credited += 1;
                }
            }

            ledger.end_transaction()?;

            if reward > 0 {
                summary.total_reward = summary
                    .total_reward
                    .checked_add(reward)
                    .ok_or(StorageError::Overflow("block reward"))?;
                summary.rewards.push(RewardRecord {
                    tx_id: tx.tx_id,
                    zero_count: tx.zero_count,
                    reward,
                });
            }
        }

        Ok(summary)
    }

    fn reward_for(&self, tx: &Transaction, block: &Block) -> Amount {
        if tx.zero_count >= self.params.min_zero_count {
            debug!(
                height = block.height,
                tx_id = %tx.tx_id,
                zero_count = tx.zero_count,
                max_zero_count = block.max_zero_count,
                "nice transaction"
            );
        }

        let reward = calculate_reward(
            tx.zero_count,
            block.max_zero_count,
            self.params.min_zero_count,
            self.params.max_reward,
        );
        if reward > 0 {
            info!(height = block.height, tx_id = %tx.tx_id, reward, "reward minted");
        }
        reward
    }
}
