//! Persisted consensus state.
//!
//! Everything here lives in the store's metadata space so it survives a
//! restart without touching the versioned ledger keys:
//!
//! | Key | Value |
//! |-----|-------|
//! | `cs/state` | [`ConsensusState`] |
//! | `cs/block/<height be>` | [`FinalizedBlock`] |
//! | `cs/hash/<hash>` | height of a finalized block |
//! | `cs/att/<height be>` | [`CheckpointAttestation`] |
//!
//! The state is written before any vote or proposal leaves the node, so a
//! restarted node sees what it already signed.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use scpt_common::Hash;
use scpt_ledger::Block;
use scpt_storage::KvStore;

use crate::checkpoint::CheckpointAttestation;
use crate::error::ConsensusResult;
use crate::types::{BlockRef, CommitCertificate, Proposal, Vote};

const STATE_KEY: &[u8] = b"cs/state";
const BLOCK_PREFIX: &[u8] = b"cs/block/";
const HASH_PREFIX: &[u8] = b"cs/hash/";
const ATTESTATION_PREFIX: &[u8] = b"cs/att/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    pub last_finalized: Option<BlockRef>,
    pub highest_cc: Option<BlockRef>,
    pub last_vote: Option<Vote>,
    pub last_proposal: Option<Proposal>,
}

impl ConsensusState {
    /// Height the node is working on.
    #[must_use]
    pub fn next_height(&self) -> u64 {
        self.last_finalized.map_or(1, |b| b.height + 1)
    }

    /// Our vote at `height`, if we cast one.
    #[must_use]
    pub fn vote_at(&self, height: u64) -> Option<&Vote> {
        self.last_vote.as_ref().filter(|v| v.height == height)
    }

    #[must_use]
    pub fn proposal_at(&self, height: u64) -> Option<&Proposal> {
        self.last_proposal.as_ref().filter(|p| p.height() == height)
    }
}

/// A finalized block with the certificate that finalized it. Genesis and
/// snapshot anchors have no certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBlock {
    pub block: Block,
    pub cc: Option<CommitCertificate>,
}

impl FinalizedBlock {
    #[must_use]
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::of(&self.block)
    }
}

fn height_key(prefix: &[u8], height: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

#[derive(Clone)]
pub struct ConsensusStore {
    store: Arc<dyn KvStore>,
}

impl ConsensusStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> ConsensusResult<Option<T>> {
        match self.store.get_meta(key)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: &[u8], value: &T) -> ConsensusResult<()> {
        self.store.put_meta(key, bincode::serialize(value)?)?;
        Ok(())
    }

    pub fn load_state(&self) -> ConsensusResult<ConsensusState> {
        Ok(self.get(STATE_KEY)?.unwrap_or_default())
    }

    pub fn save_state(&self, state: &ConsensusState) -> ConsensusResult<()> {
        self.put(STATE_KEY, state)
    }

    pub fn put_finalized(&self, finalized: &FinalizedBlock) -> ConsensusResult<()> {
        let r = finalized.block_ref();
        self.put(&height_key(BLOCK_PREFIX, r.height), finalized)?;
        let mut hash_key = HASH_PREFIX.to_vec();
        hash_key.extend_from_slice(r.hash.as_bytes());
        self.put(&hash_key, &r.height)
    }

    pub fn finalized_at(&self, height: u64) -> ConsensusResult<Option<FinalizedBlock>> {
        self.get(&height_key(BLOCK_PREFIX, height))
    }

    pub fn finalized_by_hash(&self, hash: &Hash) -> ConsensusResult<Option<FinalizedBlock>> {
        let mut key = HASH_PREFIX.to_vec();
        key.extend_from_slice(hash.as_bytes());
        match self.get::<u64>(&key)? {
            Some(height) => self.finalized_at(height),
            None => Ok(None),
        }
    }

    pub fn put_attestation(&self, attestation: &CheckpointAttestation) -> ConsensusResult<()> {
        self.put(&height_key(ATTESTATION_PREFIX, attestation.height), attestation)
    }

    pub fn attestation_at(&self, height: u64) -> ConsensusResult<Option<CheckpointAttestation>> {
        self.get(&height_key(ATTESTATION_PREFIX, height))
    }

    /// Restart from an imported snapshot whose last block is `anchor`.
    /// Both finality markers move to the anchor and the signing record is
    /// cleared, since nothing was signed on top of the snapshot yet.
    pub fn reset_after_snapshot(&self, anchor: &Block) -> ConsensusResult<ConsensusState> {
        let r = BlockRef::of(anchor);
        self.put_finalized(&FinalizedBlock {
            block: anchor.clone(),
            cc: None,
        })?;
        let state = ConsensusState {
            last_finalized: Some(r),
            highest_cc: Some(r),
            last_vote: None,
            last_proposal: None,
        };
        self.save_state(&state)?;
        Ok(state)
    }
}
