//! Validator set and voting power.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use scpt_common::Address;
use scpt_ledger::CandidatePool;

use crate::error::{ValidatorError, ValidatorResult};
use crate::proposer::{choose_proposer, proposer_seed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    /// Sum of the holder's non-withdrawn stakes, in wei.
    pub power: u128,
}

/// Validators active for one epoch, sorted by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    epoch: u64,
    validators: Vec<Validator>,
    total_power: u128,
}

/// `3 × power > 2 × total`, computed as `power > floor(2 × total / 3)` so
/// it cannot overflow.
#[must_use]
pub fn exceeds_two_thirds(power: u128, total: u128) -> bool {
    if total == 0 {
        return false;
    }
    let two_thirds = (total / 3) * 2 + (total % 3) * 2 / 3;
    power > two_thirds
}

pub(crate) fn to_power(holder: &Address, amount: &BigInt) -> ValidatorResult<u128> {
    amount
        .to_u128()
        .ok_or(ValidatorError::PowerOverflow(*holder))
}

impl ValidatorSet {
    /// Build a set from explicit validators. Duplicates keep the first entry.
    pub fn new(epoch: u64, mut validators: Vec<Validator>) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.dedup_by(|a, b| a.address == b.address);
        validators.retain(|v| v.power > 0);
        let total_power = validators.iter().map(|v| v.power).sum();
        Self {
            epoch,
            validators,
            total_power,
        }
    }

    /// Holders of `pool` with at least `min_stake`, capped at the
    /// `max_validators` most powerful (ties broken by address).
    pub fn from_pool(
        epoch: u64,
        pool: &CandidatePool,
        min_stake: &BigInt,
        max_validators: usize,
    ) -> ValidatorResult<Self> {
        let mut ranked = Vec::new();
        for (holder, total) in pool.eligible(min_stake) {
            ranked.push(Validator {
                address: holder.holder,
                power: to_power(&holder.holder, &total)?,
            });
        }
        ranked.sort_by(|a, b| b.power.cmp(&a.power).then(a.address.cmp(&b.address)));
        ranked.truncate(max_validators);
        Ok(Self::new(epoch, ranked))
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    #[must_use]
    pub fn total_power(&self) -> u128 {
        self.total_power
    }

    #[must_use]
    pub fn power_of(&self, address: &Address) -> u128 {
        self.validators
            .binary_search_by(|v| v.address.cmp(address))
            .map(|i| self.validators[i].power)
            .unwrap_or(0)
    }

    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.power_of(address) > 0
    }

    #[must_use]
    pub fn has_supermajority(&self, power: u128) -> bool {
        exceeds_two_thirds(power, self.total_power)
    }

    /// Proposer for `(height, round)`. Round 0 is a stake-weighted draw;
    /// each later round passes to the next validator in address order, so a
    /// silent proposer is never picked twice in a row and every member gets
    /// a turn within `len()` rounds.
    #[must_use]
    pub fn proposer(&self, height: u64, round: u32) -> Option<Address> {
        let weighted: Vec<(Address, u128)> = self
            .validators
            .iter()
            .map(|v| (v.address, v.power))
            .collect();
        let first = choose_proposer(&proposer_seed(height, 0), &weighted)?;
        if round == 0 {
            return Some(first);
        }
        let start = self.validators.iter().position(|v| v.address == first)?;
        let index = (start as u64 + u64::from(round)) % self.validators.len() as u64;
        Some(self.validators[index as usize].address)
    }
}
