//! Signed consensus records.
//!
//! | Type | Signed by | Sign payload |
//! |------|-----------|--------------|
//! | [`Proposal`] | proposer (Ed25519) | `(chain_id, "proposal", height, round, block hash)` |
//! | [`Vote`] | validator (Ed25519) | `(chain_id, "vote", height, block hash)` |
//! | [`CommitCertificate`] | none, carries votes | n/a |
//!
//! Payloads are bincode-encoded tuples. The chain id is part of every
//! payload so a signature never verifies on another network.
//!
//! Votes carry no round: a validator votes once per height, and the
//! vote stays valid for every later round at that height.

use serde::{Deserialize, Serialize};

use scpt_common::{address_from_pubkey_bytes, verify_signature, Address, Hash, Keypair};
use scpt_ledger::Block;
use scpt_validator::ValidatorSet;

use crate::error::{ConsensusError, ConsensusResult};

const PROPOSAL_TAG: &str = "proposal";
const VOTE_TAG: &str = "vote";

/// Height and hash of a block, the unit consensus state refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub hash: Hash,
}

impl BlockRef {
    pub fn of(block: &Block) -> Self {
        Self {
            height: block.height(),
            hash: block.hash(),
        }
    }
}

/// Check that `pubkey` belongs to `signer` and signed `msg`.
fn check_signer(signer: &Address, pubkey: &[u8], msg: &[u8], sig: &[u8]) -> ConsensusResult<()> {
    if &address_from_pubkey_bytes(pubkey) != signer || !verify_signature(pubkey, msg, sig) {
        return Err(ConsensusError::InvalidSignature(*signer));
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// PROPOSAL
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub block: Block,
    pub round: u32,
    pub proposer: Address,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Proposal {
    pub fn sign_bytes(chain_id: &str, height: u64, round: u32, hash: &Hash) -> ConsensusResult<Vec<u8>> {
        Ok(bincode::serialize(&(chain_id, PROPOSAL_TAG, height, round, hash))?)
    }

    pub fn new(chain_id: &str, block: Block, round: u32, key: &Keypair) -> ConsensusResult<Self> {
        let msg = Self::sign_bytes(chain_id, block.height(), round, &block.hash())?;
        Ok(Self {
            block,
            round,
            proposer: key.address(),
            pubkey: key.public_key_bytes(),
            signature: key.sign(&msg),
        })
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.block.height()
    }

    #[must_use]
    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }

    /// Signature and header consistency. Does not check that the proposer
    /// is the designated one for the round.
    ///
    /// A round-0 block must name its signer. Later rounds may carry a block
    /// built in an earlier round, whose header still names that round's
    /// proposer.
    pub fn verify(&self, chain_id: &str) -> ConsensusResult<()> {
        if self.round == 0 && self.block.header.proposer != self.proposer {
            return Err(ConsensusError::InvalidProposal(format!(
                "header names proposer {}, signed by {}",
                self.block.header.proposer, self.proposer
            )));
        }
        let msg = Self::sign_bytes(chain_id, self.height(), self.round, &self.block_hash())?;
        check_signer(&self.proposer, &self.pubkey, &msg, &self.signature)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// VOTE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: Address,
    pub height: u64,
    pub block_hash: Hash,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Vote {
    pub fn sign_bytes(chain_id: &str, height: u64, hash: &Hash) -> ConsensusResult<Vec<u8>> {
        Ok(bincode::serialize(&(chain_id, VOTE_TAG, height, hash))?)
    }

    pub fn new(chain_id: &str, height: u64, block_hash: Hash, key: &Keypair) -> ConsensusResult<Self> {
        let msg = Self::sign_bytes(chain_id, height, &block_hash)?;
        Ok(Self {
            voter: key.address(),
            height,
            block_hash,
            pubkey: key.public_key_bytes(),
            signature: key.sign(&msg),
        })
    }

    pub fn verify(&self, chain_id: &str) -> ConsensusResult<()> {
        let msg = Self::sign_bytes(chain_id, self.height, &self.block_hash)?;
        check_signer(&self.voter, &self.pubkey, &msg, &self.signature)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMMIT CERTIFICATE
// ════════════════════════════════════════════════════════════════════════════

/// Votes for one block whose combined power exceeds two thirds of the
/// validator set at that height. Votes are sorted by voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub height: u64,
    pub block_hash: Hash,
    pub votes: Vec<Vote>,
}

impl CommitCertificate {
    #[must_use]
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            height: self.height,
            hash: self.block_hash,
        }
    }

    /// Combined power of the certificate's voters in `set`.
    #[must_use]
    pub fn power(&self, set: &ValidatorSet) -> u128 {
        self.votes
            .iter()
            .fold(0u128, |acc, v| acc.saturating_add(set.power_of(&v.voter)))
    }

    /// Full check against the validator set for `self.height`.
    pub fn verify(&self, set: &ValidatorSet, chain_id: &str) -> ConsensusResult<()> {
        let mut previous: Option<Address> = None;
        for vote in &self.votes {
            if vote.height != self.height || vote.block_hash != self.block_hash {
                return Err(ConsensusError::InvalidCertificate(format!(
                    "vote by {} is for {} at {}",
                    vote.voter, vote.block_hash, vote.height
                )));
            }
            if previous.is_some_and(|p| p >= vote.voter) {
                return Err(ConsensusError::InvalidCertificate(
                    "votes not sorted or duplicated".into(),
                ));
            }
            previous = Some(vote.voter);
            if !set.contains(&vote.voter) {
                return Err(ConsensusError::UnknownValidator(vote.voter, self.height));
            }
            vote.verify(chain_id)?;
        }
        let power = self.power(set);
        if !set.has_supermajority(power) {
            return Err(ConsensusError::InvalidCertificate(format!(
                "power {} of {} is not a supermajority",
                power,
                set.total_power()
            )));
        }
        Ok(())
    }
}
