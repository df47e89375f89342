//! Stake deposits and candidate pools.
//!
//! Stake is deposited by a *source* account on behalf of a *holder* (the
//! validator, guardian or elite edge node that uses the voting power). One
//! pool exists per purpose; each holder keeps the list of stakes deposited
//! to it. A withdrawn stake stays in the pool (without voting power) until
//! its return height, then goes back to the source.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use scpt_common::coin::bigint_string;
use scpt_common::{Address, BlsPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StakePurpose {
    Validator = 0,
    Guardian = 1,
    EliteEdgeNode = 2,
}

impl StakePurpose {
    pub const ALL: [StakePurpose; 3] = [
        StakePurpose::Validator,
        StakePurpose::Guardian,
        StakePurpose::EliteEdgeNode,
    ];

    /// Guardian and elite edge node holders sign checkpoints with BLS keys.
    #[must_use]
    pub fn requires_bls(self) -> bool {
        !matches!(self, StakePurpose::Validator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StakePurpose::Validator => "validator",
            StakePurpose::Guardian => "guardian",
            StakePurpose::EliteEdgeNode => "eenp",
        }
    }
}

impl TryFrom<u8> for StakePurpose {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StakePurpose::Validator),
            1 => Ok(StakePurpose::Guardian),
            2 => Ok(StakePurpose::EliteEdgeNode),
            other => Err(LedgerError::StakeCheck(format!(
                "unknown stake purpose {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub source: Address,
    #[serde(with = "bigint_string")]
    pub amount: BigInt,
    pub withdrawn: bool,
    /// Height at which a withdrawn stake is paid back; 0 while active.
    pub return_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeHolder {
    pub holder: Address,
    pub stakes: Vec<Stake>,
    pub bls_pubkey: Option<BlsPublicKey>,
}

impl StakeHolder {
    pub fn new(holder: Address, bls_pubkey: Option<BlsPublicKey>) -> Self {
        Self {
            holder,
            stakes: Vec::new(),
            bls_pubkey,
        }
    }

    /// Sum of stakes that have not been withdrawn.
    pub fn total_stake(&self) -> BigInt {
        self.stakes
            .iter()
            .filter(|s| !s.withdrawn)
            .fold(BigInt::zero(), |acc, s| acc + &s.amount)
    }

    pub fn stake_from(&self, source: &Address) -> Option<&Stake> {
        self.stakes.iter().find(|s| &s.source == source)
    }

    fn deposit(&mut self, source: Address, amount: BigInt) -> LedgerResult<()> {
        match self.stakes.iter_mut().find(|s| s.source == source) {
            Some(s) if s.withdrawn => Err(LedgerError::StakeCheck(format!(
                "stake from {} to {} is pending return at height {}",
                source, self.holder, s.return_height
            ))),
            Some(s) => {
                s.amount += amount;
                Ok(())
            }
            None => {
                self.stakes.push(Stake {
                    source,
                    amount,
                    withdrawn: false,
                    return_height: 0,
                });
                Ok(())
            }
        }
    }

    fn withdraw(&mut self, source: &Address, return_height: u64) -> LedgerResult<()> {
        match self.stakes.iter_mut().find(|s| &s.source == source) {
            Some(s) if s.withdrawn => Err(LedgerError::StakeCheck(format!(
                "stake from {} to {} already withdrawn",
                source, self.holder
            ))),
            Some(s) => {
                s.withdrawn = true;
                s.return_height = return_height;
                Ok(())
            }
            None => Err(LedgerError::StakeCheck(format!(
                "no stake from {} to {}",
                source, self.holder
            ))),
        }
    }
}

/// All holders for one purpose, sorted by holder address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePool {
    pub purpose: StakePurpose,
    pub holders: Vec<StakeHolder>,
}

impl CandidatePool {
    pub fn new(purpose: StakePurpose) -> Self {
        Self {
            purpose,
            holders: Vec::new(),
        }
    }

    pub fn holder(&self, holder: &Address) -> Option<&StakeHolder> {
        self.holders
            .binary_search_by(|h| h.holder.cmp(holder))
            .ok()
            .map(|i| &self.holders[i])
    }

    pub fn check_deposit(
        &self,
        source: &Address,
        holder: &Address,
        amount: &BigInt,
    ) -> LedgerResult<()> {
        if !amount.is_positive() {
            return Err(LedgerError::StakeCheck("stake amount must be positive".into()));
        }
        if let Some(s) = self.holder(holder).and_then(|h| h.stake_from(source)) {
            if s.withdrawn {
                return Err(LedgerError::StakeCheck(format!(
                    "stake from {} to {} is pending return at height {}",
                    source, holder, s.return_height
                )));
            }
        }
        Ok(())
    }

    pub fn deposit_stake(
        &mut self,
        source: Address,
        holder: Address,
        amount: BigInt,
        bls_pubkey: Option<BlsPublicKey>,
    ) -> LedgerResult<()> {
        let idx = match self.holders.binary_search_by(|h| h.holder.cmp(&holder)) {
            Ok(i) => i,
            Err(i) => {
                self.holders.insert(i, StakeHolder::new(holder, bls_pubkey));
                i
            }
        };
        let h = &mut self.holders[idx];
        if h.bls_pubkey.is_none() {
            h.bls_pubkey = bls_pubkey;
        }
        h.deposit(source, amount)
    }

    pub fn check_withdraw(&self, source: &Address, holder: &Address) -> LedgerResult<()> {
        let Some(h) = self.holder(holder) else {
            return Err(LedgerError::StakeCheck(format!(
                "{} is not a {} stake holder",
                holder,
                self.purpose.as_str()
            )));
        };
        match h.stake_from(source) {
            None => Err(LedgerError::StakeCheck(format!(
                "no stake from {} to {}",
                source, holder
            ))),
            Some(s) if s.withdrawn => Err(LedgerError::StakeCheck(format!(
                "stake from {} to {} already withdrawn",
                source, holder
            ))),
            Some(_) => Ok(()),
        }
    }

    pub fn withdraw_stake(
        &mut self,
        source: &Address,
        holder: &Address,
        return_height: u64,
    ) -> LedgerResult<()> {
        let idx = self
            .holders
            .binary_search_by(|h| h.holder.cmp(holder))
            .map_err(|_| LedgerError::StakeCheck(format!("unknown holder {}", holder)))?;
        self.holders[idx].withdraw(source, return_height)
    }

    /// Remove every withdrawn stake due at or before `height`, dropping
    /// holders left without stakes. Returns `(source, amount)` pairs in
    /// holder order.
    pub fn take_returned_stakes(&mut self, height: u64) -> Vec<(Address, BigInt)> {
        let mut returned = Vec::new();
        for h in &mut self.holders {
            h.stakes.retain(|s| {
                if s.withdrawn && s.return_height <= height {
                    returned.push((s.source, s.amount.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.holders.retain(|h| !h.stakes.is_empty());
        returned
    }

    /// Holders with at least `min` active stake, with their totals.
    pub fn eligible(&self, min: &BigInt) -> Vec<(&StakeHolder, BigInt)> {
        self.holders
            .iter()
            .map(|h| (h, h.total_stake()))
            .filter(|(_, total)| total >= min && total.is_positive())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn deposits_accumulate_per_source() {
        let mut pool = CandidatePool::new(StakePurpose::Validator);
        pool.deposit_stake(addr(1), addr(9), BigInt::from(10), None).unwrap();
        pool.deposit_stake(addr(1), addr(9), BigInt::from(5), None).unwrap();
        pool.deposit_stake(addr(2), addr(9), BigInt::from(7), None).unwrap();
        let h = pool.holder(&addr(9)).unwrap();
        assert_eq!(h.stakes.len(), 2);
        assert_eq!(h.total_stake(), BigInt::from(22));
    }

    #[test]
    fn holders_stay_sorted() {
        let mut pool = CandidatePool::new(StakePurpose::Guardian);
        for b in [5u8, 1, 3] {
            pool.deposit_stake(addr(b), addr(b), BigInt::from(1), None).unwrap();
        }
        let order: Vec<_> = pool.holders.iter().map(|h| h.holder).collect();
        assert_eq!(order, vec![addr(1), addr(3), addr(5)]);
    }

    #[test]
    fn withdrawn_stake_loses_power_then_returns() {
        let mut pool = CandidatePool::new(StakePurpose::Validator);
        pool.deposit_stake(addr(1), addr(9), BigInt::from(10), None).unwrap();
        pool.deposit_stake(addr(2), addr(9), BigInt::from(4), None).unwrap();
        pool.withdraw_stake(&addr(1), &addr(9), 500).unwrap();

        assert_eq!(pool.holder(&addr(9)).unwrap().total_stake(), BigInt::from(4));
        assert!(pool.check_withdraw(&addr(1), &addr(9)).is_err());
        assert!(pool.check_deposit(&addr(1), &addr(9), &BigInt::from(1)).is_err());

        assert!(pool.take_returned_stakes(499).is_empty());
        assert_eq!(pool.take_returned_stakes(500), vec![(addr(1), BigInt::from(10))]);
        assert_eq!(pool.holder(&addr(9)).unwrap().stakes.len(), 1);
    }

    #[test]
    fn empty_holders_are_dropped_after_return() {
        let mut pool = CandidatePool::new(StakePurpose::EliteEdgeNode);
        pool.deposit_stake(addr(1), addr(9), BigInt::from(10), None).unwrap();
        pool.withdraw_stake(&addr(1), &addr(9), 10).unwrap();
        pool.take_returned_stakes(10);
        assert!(pool.holders.is_empty());
    }

    #[test]
    fn eligibility_threshold() {
        let mut pool = CandidatePool::new(StakePurpose::Validator);
        pool.deposit_stake(addr(1), addr(1), BigInt::from(100), None).unwrap();
        pool.deposit_stake(addr(2), addr(2), BigInt::from(99), None).unwrap();
        let e = pool.eligible(&BigInt::from(100));
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].0.holder, addr(1));
    }

    #[test]
    fn purpose_codes() {
        assert_eq!(StakePurpose::try_from(2).unwrap(), StakePurpose::EliteEdgeNode);
        assert!(StakePurpose::try_from(3).is_err());
        assert!(StakePurpose::Guardian.requires_bls());
        assert!(!StakePurpose::Validator.requires_bls());
    }
}
