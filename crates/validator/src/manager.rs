//! Validator manager: per-epoch validator sets and per-checkpoint committees,
//! derived from committed stake state and cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use scpt_common::heights::{last_checkpoint_height, min_validator_stake};
use scpt_common::Address;
use scpt_ledger::{Ledger, LedgerResult, StakeSnapshot};

use crate::committee::Committee;
use crate::epoch::EpochConfig;
use crate::error::{ValidatorError, ValidatorResult};
use crate::set::ValidatorSet;

/// Epochs and checkpoints kept in memory. Older entries are recomputed on
/// demand from the store.
const CACHE_LIMIT: usize = 16;

/// Read access to committed stake pools.
pub trait StakeSource: Send + Sync {
    fn stake_snapshot_at(&self, height: u64) -> LedgerResult<StakeSnapshot>;
}

impl StakeSource for Ledger {
    fn stake_snapshot_at(&self, height: u64) -> LedgerResult<StakeSnapshot> {
        Ledger::stake_snapshot_at(self, height)
    }
}

pub struct ValidatorManager {
    source: Arc<dyn StakeSource>,
    config: EpochConfig,
    sets: RwLock<BTreeMap<u64, Arc<ValidatorSet>>>,
    committees: RwLock<BTreeMap<u64, Arc<Committee>>>,
}

impl ValidatorManager {
    pub fn new(source: Arc<dyn StakeSource>, config: EpochConfig) -> Self {
        Self {
            source,
            config,
            sets: RwLock::new(BTreeMap::new()),
            committees: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EpochConfig {
        &self.config
    }

    /// Validator set that proposes and votes at `height`.
    pub fn validator_set_for_height(&self, height: u64) -> ValidatorResult<Arc<ValidatorSet>> {
        if height == 0 {
            return Err(ValidatorError::GenesisHeight(height));
        }
        let epoch = self.config.epoch_of(height);
        if let Some(set) = self.sets.read().get(&epoch) {
            return Ok(Arc::clone(set));
        }

        let start = self.config.epoch_start(height);
        let snapshot = self.source.stake_snapshot_at(start)?;
        // thresholds are those in force at the first block of the epoch
        let min = min_validator_stake(start + 1);
        let set = ValidatorSet::from_pool(
            epoch,
            &snapshot.validators,
            &min,
            self.config.max_validators,
        )?;
        if set.is_empty() {
            return Err(ValidatorError::NoValidators { height, epoch });
        }
        info!(
            epoch,
            from_height = start,
            validators = set.len(),
            total_power = %set.total_power(),
            "validator set computed"
        );

        let set = Arc::new(set);
        let mut sets = self.sets.write();
        sets.insert(epoch, Arc::clone(&set));
        while sets.len() > CACHE_LIMIT {
            sets.pop_first();
        }
        Ok(set)
    }

    /// Proposer for `(height, round)`.
    pub fn proposer(&self, height: u64, round: u32) -> ValidatorResult<Address> {
        let set = self.validator_set_for_height(height)?;
        set.proposer(height, round).ok_or(ValidatorError::NoValidators {
            height,
            epoch: set.epoch(),
        })
    }

    /// Checkpoint committee responsible for the checkpoint at or before
    /// `height`. Computed from the state committed at that checkpoint, so
    /// it is only available once the checkpoint block is committed.
    pub fn committee_for_height(&self, height: u64) -> ValidatorResult<Arc<Committee>> {
        let checkpoint = last_checkpoint_height(height);
        if let Some(c) = self.committees.read().get(&checkpoint) {
            return Ok(Arc::clone(c));
        }
        let snapshot = self.source.stake_snapshot_at(checkpoint)?;
        let committee = Arc::new(Committee::from_snapshot(checkpoint, &snapshot)?);
        debug!(
            checkpoint,
            members = committee.members().len(),
            "checkpoint committee computed"
        );
        let mut committees = self.committees.write();
        committees.insert(checkpoint, Arc::clone(&committee));
        while committees.len() > CACHE_LIMIT {
            committees.pop_first();
        }
        Ok(committee)
    }

    /// Drop cached sets, e.g. after the store was replaced by a snapshot.
    pub fn clear_cache(&self) {
        self.sets.write().clear();
        self.committees.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use scpt_common::tokens;
    use scpt_ledger::{CandidatePool, StakePurpose};

    /// Snapshot source returning the same pools at every height, counting reads.
    struct Fixed {
        validators: CandidatePool,
        reads: Mutex<Vec<u64>>,
    }

    impl StakeSource for Fixed {
        fn stake_snapshot_at(&self, height: u64) -> LedgerResult<StakeSnapshot> {
            self.reads.lock().push(height);
            Ok(StakeSnapshot {
                height,
                validators: self.validators.clone(),
                guardians: CandidatePool::new(StakePurpose::Guardian),
                elite_edge_nodes: CandidatePool::new(StakePurpose::EliteEdgeNode),
            })
        }
    }

    fn manager(stakes: &[(u8, u64)]) -> (Arc<Fixed>, ValidatorManager) {
        let mut validators = CandidatePool::new(StakePurpose::Validator);
        for (b, amount) in stakes {
            validators
                .deposit_stake(
                    Address::from_bytes([0xee; 20]),
                    Address::from_bytes([*b; 20]),
                    tokens(*amount),
                    None,
                )
                .unwrap();
        }
        let fixed = Arc::new(Fixed {
            validators,
            reads: Mutex::new(Vec::new()),
        });
        let mgr = ValidatorManager::new(fixed.clone(), EpochConfig::new(10, 31).unwrap());
        (fixed, mgr)
    }

    #[test]
    fn sets_are_cached_per_epoch() {
        let (fixed, mgr) = manager(&[(1, 200_000), (2, 100_000)]);
        let a = mgr.validator_set_for_height(3).unwrap();
        let b = mgr.validator_set_for_height(10).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        mgr.validator_set_for_height(11).unwrap();
        assert_eq!(*fixed.reads.lock(), vec![0, 10]);

        mgr.clear_cache();
        mgr.validator_set_for_height(5).unwrap();
        assert_eq!(fixed.reads.lock().len(), 3);
    }

    #[test]
    fn empty_set_is_an_error() {
        let (_, mgr) = manager(&[(1, 50)]);
        assert!(matches!(
            mgr.validator_set_for_height(1),
            Err(ValidatorError::NoValidators { height: 1, epoch: 0 })
        ));
        assert!(matches!(
            mgr.validator_set_for_height(0),
            Err(ValidatorError::GenesisHeight(0))
        ));
    }

    #[test]
    fn proposer_comes_from_the_set() {
        let (_, mgr) = manager(&[(1, 200_000), (2, 100_000), (3, 150_000)]);
        for h in 1..30 {
            let p = mgr.proposer(h, 0).unwrap();
            assert!(mgr.validator_set_for_height(h).unwrap().contains(&p));
        }
    }

    #[test]
    fn committee_uses_last_checkpoint() {
        let (fixed, mgr) = manager(&[(1, 200_000)]);
        let c = mgr.committee_for_height(150).unwrap();
        assert_eq!(c.checkpoint_height(), 101);
        assert!(c.is_empty());
        mgr.committee_for_height(199).unwrap();
        assert_eq!(*fixed.reads.lock(), vec![101]);
    }
}
