//! Staking rewards issued at checkpoint heights.
//!
//! Each non-withdrawn stake earns `amount * numerator / denominator` per
//! block for the `CHECKPOINT_INTERVAL` blocks since the previous
//! checkpoint, paid to the stake's source. When the holder has a stake
//! reward distribution rule, `split_basis_point / 10000` of rewards on
//! stakes from other sources goes to the rule's beneficiary.
//!
//! The rates currently in force are all zero: no new SCPT or SPAY is
//! minted. The mechanism still runs at every checkpoint so that a rate
//! change is a pure constant change.

use num_bigint::BigInt;
use num_traits::Zero;
use scpt_common::heights::{
    is_checkpoint_height, min_elite_edge_node_stake, min_guardian_stake, min_validator_stake,
    CHECKPOINT_INTERVAL, HEIGHT_ENABLE_VALIDATOR_REWARD, HEIGHT_SAMPLE_STAKING_REWARD,
};
use scpt_common::{Address, Coins};
use tracing::info;

use crate::error::LedgerResult;
use crate::execution::credit;
use crate::stake::{CandidatePool, StakePurpose};
use crate::state::StoreView;

/// Fraction of existing wei generated per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub numerator: i64,
    pub denominator: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardRates {
    pub validator_scpt: Rate,
    pub validator_spay: Rate,
    /// Guardians and elite edge nodes.
    pub regular_spay: Rate,
}

pub const CURRENT_REWARD_RATES: RewardRates = RewardRates {
    validator_scpt: Rate {
        numerator: 0,
        denominator: 100_000_000_000,
    },
    validator_spay: Rate {
        numerator: 0,
        denominator: 1_000_000_000,
    },
    regular_spay: Rate {
        numerator: 0,
        denominator: 10_000_000_000,
    },
};

fn per_interval(amount: &BigInt, rate: Rate) -> BigInt {
    if rate.numerator == 0 || rate.denominator == 0 {
        return BigInt::zero();
    }
    amount * BigInt::from(rate.numerator) * BigInt::from(CHECKPOINT_INTERVAL)
        / BigInt::from(rate.denominator)
}

/// Mint rewards if the view's block height is a rewarding checkpoint.
/// Returns the total minted.
pub(crate) fn issue_stake_rewards(view: &mut StoreView, rates: &RewardRates) -> LedgerResult<Coins> {
    let height = view.block_height();
    if !is_checkpoint_height(height) || height < HEIGHT_SAMPLE_STAKING_REWARD {
        return Ok(Coins::zero());
    }
    let mut minted = Coins::zero();
    if height >= HEIGHT_ENABLE_VALIDATOR_REWARD {
        let vcp = view.get_candidate_pool(StakePurpose::Validator)?;
        minted = minted.plus(&reward_pool(
            view,
            &vcp,
            &min_validator_stake(height),
            rates.validator_scpt,
            rates.validator_spay,
        )?);
    }
    for (purpose, min) in [
        (StakePurpose::Guardian, min_guardian_stake(height)),
        (StakePurpose::EliteEdgeNode, min_elite_edge_node_stake(height)),
    ] {
        let pool = view.get_candidate_pool(purpose)?;
        let none = Rate {
            numerator: 0,
            denominator: 1,
        };
        minted = minted.plus(&reward_pool(view, &pool, &min, none, rates.regular_spay)?);
    }
    if !minted.is_zero() {
        info!(height, %minted, "issued staking rewards");
    }
    Ok(minted)
}

fn reward_pool(
    view: &mut StoreView,
    pool: &CandidatePool,
    min: &BigInt,
    scpt_rate: Rate,
    spay_rate: Rate,
) -> LedgerResult<Coins> {
    let height = view.block_height();
    let mut minted = Coins::zero();
    for (holder, _) in pool.eligible(min) {
        let rule = view.get_stake_reward_distribution(&holder.holder)?;
        for stake in holder.stakes.iter().filter(|s| !s.withdrawn) {
            let reward = Coins::new(
                per_interval(&stake.amount, scpt_rate),
                per_interval(&stake.amount, spay_rate),
            );
            if reward.is_zero() {
                continue;
            }
            let mut payouts: Vec<(Address, Coins)> = Vec::with_capacity(2);
            match &rule {
                Some(r) if stake.source != holder.holder && r.split_basis_point > 0 => {
                    let cut = reward.scale(
                        &BigInt::from(r.split_basis_point),
                        &BigInt::from(10_000u32),
                    );
                    payouts.push((r.beneficiary, cut.clone()));
                    payouts.push((stake.source, reward.minus(&cut)));
                }
                _ => payouts.push((stake.source, reward.clone())),
            }
            for (addr, coins) in payouts {
                if coins.is_zero() {
                    continue;
                }
                let mut account = view.get_or_make_account(&addr)?;
                credit(&mut account, &coins, height);
                view.set_account(&account)?;
            }
            minted = minted.plus(&reward);
        }
    }
    Ok(minted)
}
