//! Vote tally for one height.
//!
//! Keeps the single vote seen from each validator and the power behind
//! each block hash. A second vote from the same validator for a different
//! hash is equivocation and is rejected without touching the tally, so any
//! delivery order of the same valid votes certifies the same block.

use std::collections::BTreeMap;
use std::sync::Arc;

use scpt_common::{Address, Hash};
use scpt_validator::ValidatorSet;

use crate::error::{ConsensusError, ConsensusResult};
use crate::types::{CommitCertificate, Vote};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddVote {
    /// Counted. `power` is the hash's new total.
    Added { block_hash: Hash, power: u128 },
    /// Same vote seen before.
    Duplicate,
    /// This vote pushed its block past two thirds.
    Certified(CommitCertificate),
}

pub struct VoteSet {
    chain_id: String,
    height: u64,
    set: Arc<ValidatorSet>,
    votes: BTreeMap<Address, Vote>,
    tally: BTreeMap<Hash, u128>,
    certificate: Option<CommitCertificate>,
}

impl VoteSet {
    pub fn new(chain_id: impl Into<String>, height: u64, set: Arc<ValidatorSet>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
            set,
            votes: BTreeMap::new(),
            tally: BTreeMap::new(),
            certificate: None,
        }
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.height
    }

    #[must_use]
    pub fn validator_set(&self) -> &Arc<ValidatorSet> {
        &self.set
    }

    pub fn add(&mut self, vote: Vote) -> ConsensusResult<AddVote> {
        if vote.height != self.height {
            return Err(ConsensusError::InvalidVote(format!(
                "vote for height {} in tally for {}",
                vote.height, self.height
            )));
        }
        let power = self.set.power_of(&vote.voter);
        if power == 0 {
            return Err(ConsensusError::UnknownValidator(vote.voter, self.height));
        }
        if let Some(existing) = self.votes.get(&vote.voter) {
            if existing.block_hash == vote.block_hash {
                return Ok(AddVote::Duplicate);
            }
            // verify before accusing, a forged vote is not evidence
            vote.verify(&self.chain_id)?;
            return Err(ConsensusError::Equivocation {
                voter: vote.voter,
                height: self.height,
                first: existing.block_hash,
                second: vote.block_hash,
            });
        }
        vote.verify(&self.chain_id)?;

        let block_hash = vote.block_hash;
        let total = self.tally.entry(block_hash).or_insert(0);
        *total = total.saturating_add(power);
        let total = *total;
        self.votes.insert(vote.voter, vote);

        if self.certificate.is_none() && self.set.has_supermajority(total) {
            let cc = CommitCertificate {
                height: self.height,
                block_hash,
                votes: self
                    .votes
                    .values()
                    .filter(|v| v.block_hash == block_hash)
                    .cloned()
                    .collect(),
            };
            self.certificate = Some(cc.clone());
            return Ok(AddVote::Certified(cc));
        }
        Ok(AddVote::Added {
            block_hash,
            power: total,
        })
    }

    #[must_use]
    pub fn certificate(&self) -> Option<&CommitCertificate> {
        self.certificate.as_ref()
    }

    #[must_use]
    pub fn vote_of(&self, voter: &Address) -> Option<&Vote> {
        self.votes.get(voter)
    }

    #[must_use]
    pub fn power_for(&self, block_hash: &Hash) -> u128 {
        self.tally.get(block_hash).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
