//! Reward protocol.
//!
//! A transaction whose display id starts with at least `min_zero_count`
//! zero digits mints a reward that decays by a factor of 16 for every
//! zero it has fewer than the block's best transaction. Minted rewards
//! and balances carried by spent inputs flow to the transaction's
//! outputs in proportion to their values.
//!
//! - [`reward`]: pure arithmetic (reward, distribution, movements),
//! - [`engine`]: applies a whole block to a [`crate::ledger::LedgerStore`],
//! - [`params`]: per-network protocol parameters.

pub mod engine;
pub mod params;
pub mod reward;

pub use engine::{BlockSummary, ProtocolEngine, RewardRecord};
pub use params::{Network, ProtocolParams};
pub use reward::{Movement, calculate_distribution, calculate_reward, generate_movements};
