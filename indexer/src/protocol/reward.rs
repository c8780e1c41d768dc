//! Reward and value-distribution arithmetic.
//!
//! All functions here are pure and integer-only; results are floored.

use crate::types::{Amount, Transaction, UtxoId};

/// Credit of `amount` to one ledger entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Movement {
    pub utxo_id: UtxoId,
    pub amount: Amount,
}

/// Reward for a transaction with `zero_count` leading zeros in a block
/// whose best transaction has `max_zero_count`.
///
/// Each missing zero divides the reward by 16.
pub fn calculate_reward(
    zero_count: u8,
    max_zero_count: u8,
    min_zero_count: u8,
    max_reward: Amount,
) -> Amount {
    if zero_count < min_zero_count {
        return 0;
    }
    let diff = u32::from(max_zero_count.saturating_sub(zero_count));
    // 16^diff == 2^(4 * diff)
    diff.checked_mul(4)
        .and_then(|shift| max_reward.checked_shr(shift))
        .unwrap_or(0)
}

/// Splits `value` across `output_values` in proportion to each value.
///
/// Shares are floored and the remainder goes to the first element, so the
/// result sums to `value` whenever the weights sum to more than zero.
pub fn calculate_distribution(value: Amount, output_values: &[Amount]) -> Vec<Amount> {
    let total: u128 = output_values.iter().map(|v| u128::from(*v)).sum();
    if total == 0 {
        return vec![0; output_values.len()];
    }

    let mut distribution: Vec<Amount> = output_values
        .iter()
        .map(|weight| {
            let share = u128::from(value) * u128::from(*weight) / total;
            // share <= value, so it fits.
            share as Amount
        })
        .collect();

    let distributed: Amount = distribution.iter().sum();
    if distributed < value {
        distribution[0] += value - distributed;
    }
    distribution
}

/// Movements crediting `quantity` to the transaction's candidate outputs.
///
/// Candidates are the non-data outputs, minus the last one when there is
/// more than one. Zero amounts are omitted.
pub fn generate_movements(
    tx: &Transaction,
    quantity: Amount,
    output_values: &[Amount],
) -> Vec<Movement> {
    let mut candidates: Vec<UtxoId> = tx.eligible_outputs().map(|out| out.utxo_id).collect();
    if candidates.len() > 1 {
        candidates.pop();
    }

    calculate_distribution(quantity, output_values)
        .into_iter()
        .zip(candidates)
        .filter(|(amount, _)| *amount > 0)
        .map(|(amount, utxo_id)| Movement { utxo_id, amount })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HASH_LEN, TxId, Vout};

    const MAX: Amount = 100_000_000;

    #[test]
    fn below_threshold_earns_nothing() {
        for zero_count in 0..5 {
            assert_eq!(calculate_reward(zero_count, 9, 5, MAX), 0);
        }
    }

    #[test]
    fn best_transaction_earns_max_reward() {
        for zero_count in 5..20 {
            assert_eq!(calculate_reward(zero_count, zero_count, 5, MAX), MAX);
        }
    }

    #[test]
    fn reward_decays_by_sixteen_per_missing_zero() {
        assert_eq!(calculate_reward(6, 7, 5, MAX), 6_250_000);
        assert_eq!(calculate_reward(5, 7, 5, MAX), 390_625);
        assert_eq!(calculate_reward(5, 12, 5, MAX), 0);
        assert_eq!(calculate_reward(5, 64, 5, u64::MAX), 0);

        let mut previous = Amount::MAX;
        for zero_count in (5..=14).rev() {
            let reward = calculate_reward(zero_count, 14, 5, MAX);
            assert!(reward <= previous);
            previous = reward;
        }
    }

    #[test]
    fn distribution_gives_remainder_to_first() {
        assert_eq!(calculate_distribution(100, &[1, 1, 1]), vec![34, 33, 33]);
        assert_eq!(calculate_distribution(1000, &[300, 700]), vec![300, 700]);
        assert_eq!(calculate_distribution(7, &[0, 5]), vec![0, 7]);
        assert_eq!(calculate_distribution(9, &[2, 3, 4]).iter().sum::<Amount>(), 9);
    }

    #[test]
    fn distribution_of_zero_weights_is_all_zero() {
        assert_eq!(calculate_distribution(50, &[0, 0]), vec![0, 0]);
        assert!(calculate_distribution(50, &[]).is_empty());
    }

    #[test]
    fn distribution_does_not_overflow_on_large_values() {
        let shares = calculate_distribution(u64::MAX, &[u64::MAX, u64::MAX]);
        assert_eq!(shares.iter().map(|s| u128::from(*s)).sum::<u128>(), u128::from(u64::MAX));
    }

    fn tx_with_outputs(outputs: &[(Amount, bool)]) -> Transaction {
        let id = TxId::from_bytes([0x5a; HASH_LEN]);
        let vout = outputs
            .iter()
            .enumerate()
            .map(|(n, (value, op_return))| Vout::new(&id, n as u32, *value, *op_return))
            .collect();
        Transaction::new(id, Vec::new(), vout)
    }

    #[test]
    fn movements_drop_the_last_candidate() {
        let tx = tx_with_outputs(&[(300, false), (700, false)]);
        let movements = generate_movements(&tx, MAX, &[300]);

        assert_eq!(
            movements,
            vec![Movement {
                utxo_id: tx.vout[0].utxo_id,
                amount: MAX
            }]
        );
    }

    #[test]
    fn movements_skip_data_outputs_and_zero_amounts() {
        let tx = tx_with_outputs(&[(0, true), (10, false), (0, false), (5, false)]);
        let movements = generate_movements(&tx, 40, &[10, 0]);

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].utxo_id, tx.vout[1].utxo_id);
        assert_eq!(movements[0].amount, 40);
    }

    #[test]
    fn single_candidate_is_kept() {
        let tx = tx_with_outputs(&[(0, true), (25, false)]);
        let movements = generate_movements(&tx, 9, &[25]);
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].utxo_id, tx.vout[1].utxo_id);
    }
}
