//! # Checkpoint Attestation
//!
//! A second, slower layer of finality on top of commit certificates.
//!
//! ```text
//!  authority task ──Finalized(block)──►  attestor task
//!                                          │ checkpoint height? (h % 100 == 1)
//!                                          │ committee = guardians + elite edge nodes @ h
//!                                          │ sign BLS(chain, h, hash) if member
//!                                          ▼
//!  peers ◄──────── CheckpointVote ───── broadcast
//!  peers ────────► CheckpointVote ─────► aggregator(h)
//!                                          │ power > 2/3 committee power
//!                                          ▼
//!                               CheckpointAttestation (aggregate sig) → store
//! ```
//!
//! Attestation never gates block finality. A checkpoint that misses its
//! soft deadline is reported once at `warn!` and keeps collecting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scpt_common::{
    aggregate_signatures, is_checkpoint_height, Address, BlsKeypair, BlsSignature, Hash,
    CHECKPOINT_INTERVAL,
};
use scpt_ledger::Block;
use scpt_validator::{Committee, ValidatorManager};

use crate::error::{ConsensusError, ConsensusResult};
use crate::message::ConsensusMessage;
use crate::network::Network;
use crate::state::{ConsensusStore, FinalizedBlock};

const CHECKPOINT_TAG: &str = "checkpoint";

/// Checkpoints collected in parallel. Older rounds are dropped.
const MAX_OPEN_ROUNDS: usize = 4;

/// Wake-up interval when no soft deadline is pending.
const IDLE_POLL_MS: u64 = 60_000;

/// Votes for checkpoints more than this far above the last finalized block
/// are dropped on arrival.
const EARLY_VOTE_HORIZON: u64 = 2 * CHECKPOINT_INTERVAL;

/// Early votes held per checkpoint from signers the latest committee does
/// not know.
const MAX_UNKNOWN_EARLY_VOTES: usize = 256;

fn sign_bytes(chain_id: &str, height: u64, hash: &Hash) -> ConsensusResult<Vec<u8>> {
    Ok(bincode::serialize(&(chain_id, CHECKPOINT_TAG, height, hash))?)
}

// ════════════════════════════════════════════════════════════════════════════
// RECORDS
// ════════════════════════════════════════════════════════════════════════════

/// One committee member's BLS signature over a checkpoint block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointVote {
    pub height: u64,
    pub block_hash: Hash,
    pub signer: Address,
    pub signature: BlsSignature,
}

impl CheckpointVote {
    pub fn new(
        chain_id: &str,
        height: u64,
        block_hash: Hash,
        signer: Address,
        key: &BlsKeypair,
    ) -> ConsensusResult<Self> {
        let msg = sign_bytes(chain_id, height, &block_hash)?;
        Ok(Self {
            height,
            block_hash,
            signer,
            signature: key.sign(&msg),
        })
    }
}

/// Aggregate committee signature over a checkpoint block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointAttestation {
    pub height: u64,
    pub block_hash: Hash,
    /// Sorted, unique.
    pub signers: Vec<Address>,
    pub power: u128,
    pub signature: BlsSignature,
}

impl CheckpointAttestation {
    /// Check the aggregate against the committee for `self.height`.
    pub fn verify(&self, committee: &Committee, chain_id: &str) -> ConsensusResult<()> {
        if committee.checkpoint_height() != self.height {
            return Err(ConsensusError::InvalidCheckpointVote(format!(
                "committee is for checkpoint {}, attestation for {}",
                committee.checkpoint_height(),
                self.height
            )));
        }
        let mut pubkeys = Vec::with_capacity(self.signers.len());
        let mut power = 0u128;
        for (i, signer) in self.signers.iter().enumerate() {
            if i > 0 && self.signers[i - 1] >= *signer {
                return Err(ConsensusError::InvalidCheckpointVote(
                    "signers not sorted or duplicated".into(),
                ));
            }
            let member = committee.member(signer).ok_or_else(|| {
                ConsensusError::InvalidCheckpointVote(format!("{} is not a committee member", signer))
            })?;
            pubkeys.push(member.bls_pubkey);
            power = power.saturating_add(member.power);
        }
        if power != self.power || !committee.has_supermajority(power) {
            return Err(ConsensusError::InvalidCheckpointVote(format!(
                "signer power {} of {} is not a supermajority",
                power,
                committee.total_power()
            )));
        }
        let msg = sign_bytes(chain_id, self.height, &self.block_hash)?;
        if !self.signature.verify_aggregate(&msg, &pubkeys) {
            return Err(ConsensusError::InvalidCheckpointVote(
                "aggregate signature does not verify".into(),
            ));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// AGGREGATOR
// ════════════════════════════════════════════════════════════════════════════

/// Collects votes for a single checkpoint block.
pub struct CheckpointAggregator {
    chain_id: String,
    committee: Arc<Committee>,
    block_hash: Hash,
    votes: BTreeMap<Address, BlsSignature>,
    power: u128,
    attestation: Option<CheckpointAttestation>,
}

impl CheckpointAggregator {
    pub fn new(chain_id: impl Into<String>, committee: Arc<Committee>, block_hash: Hash) -> Self {
        Self {
            chain_id: chain_id.into(),
            committee,
            block_hash,
            votes: BTreeMap::new(),
            power: 0,
            attestation: None,
        }
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.committee.checkpoint_height()
    }

    #[must_use]
    pub fn power(&self) -> u128 {
        self.power
    }

    #[must_use]
    pub fn attestation(&self) -> Option<&CheckpointAttestation> {
        self.attestation.as_ref()
    }

    /// Count `vote`. Returns the attestation the first time the committee
    /// supermajority is reached.
    pub fn add(&mut self, vote: &CheckpointVote) -> ConsensusResult<Option<CheckpointAttestation>> {
        if vote.height != self.height() || vote.block_hash != self.block_hash {
            return Err(ConsensusError::InvalidCheckpointVote(format!(
                "vote for {} at {} does not match checkpoint {} at {}",
                vote.block_hash.short(),
                vote.height,
                self.block_hash.short(),
                self.height()
            )));
        }
        let member = self.committee.member(&vote.signer).ok_or_else(|| {
            ConsensusError::InvalidCheckpointVote(format!("{} is not a committee member", vote.signer))
        })?;
        if self.votes.contains_key(&vote.signer) {
            return Ok(None);
        }
        let msg = sign_bytes(&self.chain_id, vote.height, &vote.block_hash)?;
        if !vote.signature.verify(&msg, &member.bls_pubkey) {
            return Err(ConsensusError::InvalidCheckpointVote(format!(
                "bad signature from {}",
                vote.signer
            )));
        }
        self.power = self.power.saturating_add(member.power);
        self.votes.insert(vote.signer, vote.signature);

        if self.attestation.is_some() || !self.committee.has_supermajority(self.power) {
            return Ok(None);
        }
        let sigs: Vec<BlsSignature> = self.votes.values().copied().collect();
        let attestation = CheckpointAttestation {
            height: self.height(),
            block_hash: self.block_hash,
            signers: self.votes.keys().copied().collect(),
            power: self.power,
            signature: aggregate_signatures(&sigs)?,
        };
        self.attestation = Some(attestation.clone());
        Ok(Some(attestation))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ATTESTOR
// ════════════════════════════════════════════════════════════════════════════

struct OpenRound {
    aggregator: CheckpointAggregator,
    own: Option<CheckpointVote>,
    deadline_ms: u64,
    reported: bool,
}

/// Votes that arrived before their checkpoint block was finalized here.
#[derive(Default)]
struct EarlyVotes {
    /// Verified against the latest committee, one per signer.
    known: BTreeMap<Address, CheckpointVote>,
    /// Unverifiable until the round opens.
    unknown: Vec<CheckpointVote>,
}

impl EarlyVotes {
    fn into_votes(self) -> Vec<CheckpointVote> {
        self.known.into_values().chain(self.unknown).collect()
    }
}

/// Key material of a committee member.
pub struct AttestorIdentity {
    pub address: Address,
    pub bls: BlsKeypair,
}

/// Per-node attestation state machine, driven by [`run_attestor`].
pub struct CheckpointAttestor {
    chain_id: String,
    validators: Arc<ValidatorManager>,
    store: ConsensusStore,
    identity: Option<AttestorIdentity>,
    soft_deadline_ms: u64,
    rounds: BTreeMap<u64, OpenRound>,
    early: BTreeMap<u64, EarlyVotes>,
    finalized: u64,
}

impl CheckpointAttestor {
    pub fn new(
        chain_id: impl Into<String>,
        validators: Arc<ValidatorManager>,
        store: ConsensusStore,
        identity: Option<AttestorIdentity>,
        soft_deadline_ms: u64,
    ) -> Self {
        let finalized = store
            .load_state()
            .ok()
            .and_then(|s| s.last_finalized)
            .map_or(0, |b| b.height);
        Self {
            chain_id: chain_id.into(),
            validators,
            store,
            identity,
            soft_deadline_ms,
            rounds: BTreeMap::new(),
            early: BTreeMap::new(),
            finalized,
        }
    }

    /// Open a round for a finalized checkpoint block. Returns our own vote
    /// when this node sits on the committee.
    pub fn on_finalized(&mut self, block: &Block, now_ms: u64) -> ConsensusResult<Option<CheckpointVote>> {
        let height = block.height();
        self.finalized = self.finalized.max(height);
        self.early.retain(|h, _| *h >= height);
        if !is_checkpoint_height(height) || self.rounds.contains_key(&height) {
            return Ok(None);
        }
        let committee = self.validators.committee_for_height(height)?;
        if committee.is_empty() {
            debug!(height, "no checkpoint committee, skipping attestation");
            self.drop_early(height);
            return Ok(None);
        }
        let mut aggregator = CheckpointAggregator::new(&self.chain_id, committee, block.hash());
        let own = match &self.identity {
            Some(id) if aggregator.committee.member(&id.address).is_some() => Some(CheckpointVote::new(
                &self.chain_id,
                height,
                block.hash(),
                id.address,
                &id.bls,
            )?),
            _ => None,
        };
        let mut formed = None;
        if let Some(vote) = &own {
            formed = aggregator.add(vote)?;
        }
        for vote in &self.take_early(height) {
            match aggregator.add(vote) {
                Ok(Some(a)) => formed = Some(a),
                Ok(None) => {}
                Err(e) => debug!(height, signer = %vote.signer, error = %e, "dropping early checkpoint vote"),
            }
        }
        info!(
            height,
            hash = %block.hash().short(),
            members = aggregator.committee.members().len(),
            member = own.is_some(),
            "checkpoint attestation started"
        );
        self.rounds.insert(
            height,
            OpenRound {
                aggregator,
                own: own.clone(),
                deadline_ms: now_ms.saturating_add(self.soft_deadline_ms),
                reported: false,
            },
        );
        while self.rounds.len() > MAX_OPEN_ROUNDS {
            self.rounds.pop_first();
        }
        if let Some(attestation) = formed {
            self.persist(&attestation)?;
        }
        Ok(own)
    }

    /// Count a vote from a peer. Returns the attestation if it just formed.
    pub fn on_vote(&mut self, vote: CheckpointVote) -> ConsensusResult<Option<CheckpointAttestation>> {
        let Some(round) = self.rounds.get_mut(&vote.height) else {
            self.buffer_early(vote)?;
            return Ok(None);
        };
        let formed = round.aggregator.add(&vote)?;
        if let Some(attestation) = &formed {
            self.persist(attestation)?;
        }
        Ok(formed)
    }

    /// Hold a vote for a checkpoint not finalized here yet. Only the next
    /// checkpoints are kept. Signers of the latest committee are verified
    /// now and always kept; unknown signers share a bounded slot list.
    fn buffer_early(&mut self, vote: CheckpointVote) -> ConsensusResult<()> {
        let height = vote.height;
        if !is_checkpoint_height(height)
            || height <= self.finalized
            || height - self.finalized > EARLY_VOTE_HORIZON
        {
            return Ok(());
        }
        let latest = self
            .rounds
            .values()
            .next_back()
            .map(|r| Arc::clone(&r.aggregator.committee));
        match latest.as_ref().and_then(|c| c.member(&vote.signer)) {
            Some(member) => {
                let msg = sign_bytes(&self.chain_id, height, &vote.block_hash)?;
                if !vote.signature.verify(&msg, &member.bls_pubkey) {
                    return Err(ConsensusError::InvalidCheckpointVote(format!(
                        "bad signature from {}",
                        vote.signer
                    )));
                }
                self.early
                    .entry(height)
                    .or_default()
                    .known
                    .entry(vote.signer)
                    .or_insert(vote);
            }
            None => {
                let early = self.early.entry(height).or_default();
                if early.unknown.len() < MAX_UNKNOWN_EARLY_VOTES {
                    early.unknown.push(vote);
                }
            }
        }
        Ok(())
    }

    fn persist(&self, attestation: &CheckpointAttestation) -> ConsensusResult<()> {
        self.store.put_attestation(attestation)?;
        info!(
            height = attestation.height,
            signers = attestation.signers.len(),
            power = %attestation.power,
            "checkpoint attested"
        );
        Ok(())
    }

    /// Report rounds past their soft deadline without an attestation.
    /// Returns the heights reported by this call.
    pub fn check_deadlines(&mut self, now_ms: u64) -> Vec<u64> {
        let mut late = Vec::new();
        for (height, round) in self.rounds.iter_mut() {
            if round.reported || round.aggregator.attestation().is_some() || now_ms < round.deadline_ms {
                continue;
            }
            round.reported = true;
            let committee = &round.aggregator.committee;
            warn!(
                height,
                power = %round.aggregator.power(),
                total = %committee.total_power(),
                "insufficient checkpoint participation by soft deadline"
            );
            late.push(*height);
        }
        late
    }

    /// Earliest unreported soft deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.rounds
            .values()
            .filter(|r| !r.reported && r.aggregator.attestation().is_none())
            .map(|r| r.deadline_ms)
            .min()
    }

    /// Our vote for an open round, re-sent when the round misses its soft
    /// deadline so peers that dropped it early can count it.
    #[must_use]
    pub fn own_vote(&self, height: u64) -> Option<&CheckpointVote> {
        self.rounds.get(&height).and_then(|r| r.own.as_ref())
    }

    pub fn attestation_at(&self, height: u64) -> ConsensusResult<Option<CheckpointAttestation>> {
        self.store.attestation_at(height)
    }

    fn take_early(&mut self, height: u64) -> Vec<CheckpointVote> {
        self.early.remove(&height).map(EarlyVotes::into_votes).unwrap_or_default()
    }

    fn drop_early(&mut self, height: u64) {
        self.take_early(height);
    }
}

/// Drive `attestor` from finalization events and peer votes until
/// `cancel` fires.
pub async fn run_attestor(
    mut attestor: CheckpointAttestor,
    mut finalized: broadcast::Receiver<FinalizedBlock>,
    mut votes: mpsc::Receiver<CheckpointVote>,
    network: Arc<dyn Network>,
    cancel: CancellationToken,
) {
    loop {
        let wait = attestor
            .next_deadline()
            .map(|d| d.saturating_sub(crate::now_ms()))
            .unwrap_or(IDLE_POLL_MS);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("attestor stopping");
                return;
            }
            event = finalized.recv() => match event {
                Ok(f) => match attestor.on_finalized(&f.block, crate::now_ms()) {
                    Ok(Some(vote)) => {
                        if let Err(e) = network.broadcast(ConsensusMessage::CheckpointVote(vote)).await {
                            warn!(error = %e, "checkpoint vote broadcast failed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(height = f.block.height(), error = %e, "checkpoint round not started"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "attestor lagged behind finalization events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            vote = votes.recv() => match vote {
                Some(vote) => {
                    let (height, signer) = (vote.height, vote.signer);
                    if let Err(e) = attestor.on_vote(vote) {
                        debug!(height, %signer, error = %e, "checkpoint vote rejected");
                    }
                }
                None => return,
            },
            _ = tokio::time::sleep(std::time::Duration::from_millis(wait)) => {
                for height in attestor.check_deadlines(crate::now_ms()) {
                    let Some(vote) = attestor.own_vote(height).cloned() else {
                        continue;
                    };
                    debug!(height, "re-sending checkpoint vote");
                    if let Err(e) = network.broadcast(ConsensusMessage::CheckpointVote(vote)).await {
                        warn!(height, error = %e, "checkpoint vote broadcast failed");
                    }
                }
            }
        }
    }
}
