//! Split rules (payout tables of reserved-fund resources) and stake reward
//! distribution rules.

use scpt_common::Address;
use serde::{Deserialize, Serialize};

use super::{split_key, srd_key, StoreView, SPLIT_PREFIX, SRD_PREFIX};
use crate::error::LedgerResult;
use crate::tx::Split;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitContract {
    pub resource_id: String,
    pub initiator: Address,
    pub splits: Vec<Split>,
    pub end_block_height: u64,
}

impl SplitContract {
    #[must_use]
    pub fn is_expired(&self, height: u64) -> bool {
        self.end_block_height < height
    }
}

/// Share of a stake holder's rewards routed to a beneficiary, in basis
/// points of 1/10000.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardDistributionRule {
    pub holder: Address,
    pub beneficiary: Address,
    pub split_basis_point: u32,
}

impl StoreView {
    pub fn get_split_contract(&self, resource_id: &str) -> LedgerResult<Option<SplitContract>> {
        self.get(&split_key(resource_id))
    }

    pub fn set_split_contract(&mut self, contract: &SplitContract) -> LedgerResult<()> {
        self.set(split_key(&contract.resource_id), contract)
    }

    /// Drop every split contract that expired before `height`. Returns how many went.
    pub fn delete_expired_split_contracts(&mut self, height: u64) -> LedgerResult<usize> {
        let mut expired = Vec::new();
        for (key, _) in self.prefix_iter(SPLIT_PREFIX) {
            if let Some(c) = self.get::<SplitContract>(key)? {
                if c.is_expired(height) {
                    expired.push(key.clone());
                }
            }
        }
        for key in &expired {
            self.delete(key);
        }
        Ok(expired.len())
    }

    pub fn get_stake_reward_distribution(
        &self,
        holder: &Address,
    ) -> LedgerResult<Option<StakeRewardDistributionRule>> {
        self.get(&srd_key(holder))
    }

    pub fn set_stake_reward_distribution(
        &mut self,
        rule: &StakeRewardDistributionRule,
    ) -> LedgerResult<()> {
        self.set(srd_key(&rule.holder), rule)
    }

    pub fn stake_reward_distributions(&self) -> LedgerResult<Vec<StakeRewardDistributionRule>> {
        let mut out = Vec::new();
        for (key, _) in self.prefix_iter(SRD_PREFIX) {
            if let Some(rule) = self.get(key)? {
                out.push(rule);
            }
        }
        Ok(out)
    }
}
