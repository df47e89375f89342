//! Activation heights, checkpoint cadence and height-gated parameters.
//!
//! Every rule that changed over the life of the chain is expressed as a
//! pure function of the block height. Nothing here reads the wall clock:
//! replaying from genesis must reproduce the exact same decisions.
//!
//! CONSENSUS-CRITICAL: changing any value in this file is a hard fork.

use num_bigint::BigInt;

use crate::coin::tokens;

// ════════════════════════════════════════════════════════════════════════════
// ACTIVATION HEIGHTS
// ════════════════════════════════════════════════════════════════════════════

/// Validator SPAY rewards are issued from this height on.
pub const HEIGHT_ENABLE_VALIDATOR_REWARD: u64 = 1;

/// Guardian committee and BLS checkpoint attestation.
pub const HEIGHT_ENABLE_SCRIPT2: u64 = 1;

/// Guardian minimum stake drops from 10,000 to 1,000 SCPT.
pub const HEIGHT_LOWER_GN_STAKE_THRESHOLD_TO_1000: u64 = 1;

/// Smart contract transactions are accepted, and plain transfers into
/// contract accounts are rejected.
pub const HEIGHT_ENABLE_SMART_CONTRACT: u64 = 1;

/// Staking rewards are sampled at checkpoints instead of every block.
pub const HEIGHT_SAMPLE_STAKING_REWARD: u64 = 1;

pub const GENESIS_BLOCK_HEIGHT: u64 = 0;

// ════════════════════════════════════════════════════════════════════════════
// CHECKPOINTS
// ════════════════════════════════════════════════════════════════════════════

pub const CHECKPOINT_INTERVAL: u64 = 100;

/// A checkpoint is any height `h` with `h % 100 == 1`.
#[must_use]
pub fn is_checkpoint_height(height: u64) -> bool {
    height % CHECKPOINT_INTERVAL == 1
}

/// Height of the most recent checkpoint at or before `height` (for `height >= 1`).
/// Height 0 maps to 1, the first checkpoint.
///
/// Multiples of the interval belong to the checkpoint below them: 100 maps
/// to 1 and 200 to 101. Rounding up to `h / 100 * 100 + 1` instead would
/// name a checkpoint that is not committed yet.
#[must_use]
pub fn last_checkpoint_height(height: u64) -> u64 {
    let multiple = height.saturating_sub(1) / CHECKPOINT_INTERVAL;
    CHECKPOINT_INTERVAL * multiple + 1
}

// ════════════════════════════════════════════════════════════════════════════
// STAKING
// ════════════════════════════════════════════════════════════════════════════

/// Blocks between a withdrawal and the stake being returned. A multiple of
/// the checkpoint interval, so returns land on checkpoint heights.
pub const STAKE_RETURN_LOCKING_PERIOD: u64 = 28_800;

/// Minimum total stake (wei) for a validator holder to get voting power.
pub fn min_validator_stake(_height: u64) -> BigInt {
    tokens(100_000)
}

/// Minimum total stake (wei) for a guardian holder to join the checkpoint committee.
pub fn min_guardian_stake(height: u64) -> BigInt {
    if height >= HEIGHT_LOWER_GN_STAKE_THRESHOLD_TO_1000 {
        tokens(1_000)
    } else {
        tokens(10_000)
    }
}

/// Minimum total stake (wei) for an elite edge node to join the checkpoint committee.
pub fn min_elite_edge_node_stake(_height: u64) -> BigInt {
    tokens(10_000)
}

// ════════════════════════════════════════════════════════════════════════════
// FEES AND GAS
// ════════════════════════════════════════════════════════════════════════════

pub const MINIMUM_TRANSACTION_FEE_SPAY_WEI: u64 = 1_000_000_000_000;
pub const MINIMUM_GAS_PRICE: u64 = 100_000_000;
pub const MAXIMUM_TX_GAS_LIMIT: u64 = 10_000_000;
pub const LEGACY_MAXIMUM_TX_GAS_LIMIT: u64 = 2_000_000;
pub const MAX_ACCOUNTS_AFFECTED_PER_TX: usize = 512;

/// Fee floor (SPAY wei) for non-contract transactions at `height`.
pub fn minimum_transaction_fee(_height: u64) -> BigInt {
    BigInt::from(MINIMUM_TRANSACTION_FEE_SPAY_WEI)
}

/// Gas price floor for contract transactions at `height`.
pub fn minimum_gas_price(_height: u64) -> BigInt {
    BigInt::from(MINIMUM_GAS_PRICE)
}

/// Gas-limit ceiling for a single contract transaction at `height`.
pub fn maximum_tx_gas_limit(height: u64) -> u64 {
    if height >= HEIGHT_ENABLE_SMART_CONTRACT {
        MAXIMUM_TX_GAS_LIMIT
    } else {
        LEGACY_MAXIMUM_TX_GAS_LIMIT
    }
}

#[must_use]
pub fn smart_contract_enabled(height: u64) -> bool {
    height >= HEIGHT_ENABLE_SMART_CONTRACT
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checkpoint_heights() {
        assert!(is_checkpoint_height(1));
        assert!(is_checkpoint_height(101));
        assert!(is_checkpoint_height(1001));
        assert!(!is_checkpoint_height(100));
        assert!(!is_checkpoint_height(0));
        assert!(!is_checkpoint_height(102));
    }

    #[test]
    fn last_checkpoint_examples() {
        assert_eq!(last_checkpoint_height(1), 1);
        assert_eq!(last_checkpoint_height(100), 1);
        assert_eq!(last_checkpoint_height(101), 101);
        assert_eq!(last_checkpoint_height(150), 101);
        assert_eq!(last_checkpoint_height(201), 201);
    }

    #[test]
    fn interval_multiples_map_down() {
        for k in 1u64..=5 {
            let multiple = k * CHECKPOINT_INTERVAL;
            assert_eq!(last_checkpoint_height(multiple), multiple - CHECKPOINT_INTERVAL + 1);
            assert_eq!(last_checkpoint_height(multiple + 1), multiple + 1);
            assert!(last_checkpoint_height(multiple) <= multiple);
        }
        assert_eq!(last_checkpoint_height(0), 1);
    }

    #[test]
    fn return_period_lands_on_checkpoints() {
        for h in [1u64, 57, 101, 9_999] {
            assert!(is_checkpoint_height(last_checkpoint_height(h) + STAKE_RETURN_LOCKING_PERIOD));
        }
    }

    #[test]
    fn gated_values() {
        assert_eq!(min_guardian_stake(0), tokens(10_000));
        assert_eq!(min_guardian_stake(1), tokens(1_000));
        assert_eq!(maximum_tx_gas_limit(0), LEGACY_MAXIMUM_TX_GAS_LIMIT);
        assert_eq!(maximum_tx_gas_limit(5), MAXIMUM_TX_GAS_LIMIT);
        assert!(!smart_contract_enabled(0));
        assert!(smart_contract_enabled(1));
    }

    proptest! {
        #[test]
        fn last_checkpoint_is_idempotent(h in 1u64..10_000_000) {
            let c = last_checkpoint_height(h);
            prop_assert_eq!(last_checkpoint_height(c), c);
            prop_assert!(is_checkpoint_height(c));
            prop_assert!(c <= h);
            prop_assert!(h - c < CHECKPOINT_INTERVAL);
        }

        #[test]
        fn checkpoint_iff_mod_one(h in 0u64..10_000_000) {
            prop_assert_eq!(is_checkpoint_height(h), h % 100 == 1);
        }
    }
}
