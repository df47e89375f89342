//! Candidate pool accessors and stake snapshots.

use serde::{Deserialize, Serialize};

use super::{pool_key, StoreView};
use crate::error::LedgerResult;
use crate::stake::{CandidatePool, StakePurpose};

/// All three candidate pools as committed at one height. The validator
/// manager derives validator sets and checkpoint committees from this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeSnapshot {
    pub height: u64,
    pub validators: CandidatePool,
    pub guardians: CandidatePool,
    pub elite_edge_nodes: CandidatePool,
}

impl StakeSnapshot {
    pub fn pool(&self, purpose: StakePurpose) -> &CandidatePool {
        match purpose {
            StakePurpose::Validator => &self.validators,
            StakePurpose::Guardian => &self.guardians,
            StakePurpose::EliteEdgeNode => &self.elite_edge_nodes,
        }
    }
}

impl StoreView {
    /// Pool for `purpose`; empty when nothing was ever staked for it.
    pub fn get_candidate_pool(&self, purpose: StakePurpose) -> LedgerResult<CandidatePool> {
        Ok(self
            .get(&pool_key(purpose))?
            .unwrap_or_else(|| CandidatePool::new(purpose)))
    }

    pub fn set_candidate_pool(&mut self, pool: &CandidatePool) -> LedgerResult<()> {
        self.set(pool_key(pool.purpose), pool)
    }

    pub fn stake_snapshot(&self) -> LedgerResult<StakeSnapshot> {
        Ok(StakeSnapshot {
            height: self.height(),
            validators: self.get_candidate_pool(StakePurpose::Validator)?,
            guardians: self.get_candidate_pool(StakePurpose::Guardian)?,
            elite_edge_nodes: self.get_candidate_pool(StakePurpose::EliteEdgeNode)?,
        })
    }
}
