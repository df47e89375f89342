//! # Consensus Engine
//!
//! Deterministic state machine for one node. No IO, no tasks, no clock:
//! every entry point takes `now_ms` and returns [`Action`]s for the
//! authority task to carry out.
//!
//! ## Per-height lifecycle
//!
//! ```text
//!            ┌──────────────────────┐
//!   start ──►│ CollectingProposals  │◄── round timeout (round += 1,
//!            └──────────┬───────────┘    next proposer re-proposes)
//!                       │ first valid proposal → vote (once per height)
//!                       ▼
//!            ┌──────────────────────┐
//!            │      Tallying        │◄── votes from peers
//!            └──────────┬───────────┘
//!                       │ power(hash) > 2/3 total → CommitCertificate
//!                       ▼
//!            ┌──────────────────────┐
//!            │      Finalized       │── ledger commit, next height
//!            └──────────────────────┘
//! ```
//!
//! ## Safety rules
//!
//! - One vote per height. The vote is persisted before it is broadcast
//!   and a restarted node re-sends it instead of signing again.
//! - A finalized height is never revisited. A valid certificate for a
//!   different block at a finalized height halts the engine.
//! - Fatal errors (see [`ConsensusError::is_fatal`]) halt the engine;
//!   every later call returns [`ConsensusError::Halted`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use scpt_common::{Address, Hash, Keypair};
use scpt_ledger::{Block, Ledger, LedgerError, Mempool, StoreView};
use scpt_validator::ValidatorManager;

use crate::error::{ConsensusError, ConsensusResult};
use crate::message::{ConsensusMessage, DataRequest, DataResponse, Inbound};
use crate::state::{ConsensusState, ConsensusStore, FinalizedBlock};
use crate::types::{BlockRef, CommitCertificate, Proposal, Vote};
use crate::vote_set::{AddVote, VoteSet};

/// Heights ahead of the current one whose messages are buffered.
const FUTURE_HEIGHTS: u64 = 2;

/// Upper bound on buffered future messages.
const MAX_FUTURE_MESSAGES: usize = 1024;

// ════════════════════════════════════════════════════════════════════════════
// CONFIG
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout of round 0.
    pub round_timeout_ms: u64,
    /// Each later round waits `num / den` times longer than the previous.
    pub timeout_backoff_num: u64,
    pub timeout_backoff_den: u64,
    pub max_round_timeout_ms: u64,
    /// Delay before the round-0 proposer builds its block.
    pub block_interval_ms: u64,
    pub max_txs_per_block: usize,
    /// Consecutive timeouts at one height before a liveness alert.
    pub liveness_alert_rounds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 3_000,
            timeout_backoff_num: 3,
            timeout_backoff_den: 2,
            max_round_timeout_ms: 30_000,
            block_interval_ms: 1_000,
            max_txs_per_block: 1_000,
            liveness_alert_rounds: 5,
        }
    }
}

impl EngineConfig {
    /// `round_timeout_ms × backoff^round`, capped.
    #[must_use]
    pub fn round_timeout(&self, round: u32) -> u64 {
        let cap = self.max_round_timeout_ms.max(self.round_timeout_ms);
        let den = self.timeout_backoff_den.max(1);
        if self.timeout_backoff_num <= den {
            return self.round_timeout_ms.min(cap);
        }
        let mut timeout = self.round_timeout_ms;
        for _ in 0..round {
            timeout = timeout.saturating_mul(self.timeout_backoff_num) / den;
            if timeout >= cap {
                return cap;
            }
        }
        timeout.min(cap)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ACTIONS / STATUS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Broadcast(ConsensusMessage),
    Send { to: Address, message: ConsensusMessage },
    /// A block was finalized and committed to the ledger.
    Finalized(FinalizedBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    CollectingProposals,
    Tallying,
    Halted,
}

/// Snapshot of engine progress shared with RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusStatus {
    pub height: u64,
    pub round: u32,
    pub phase: Phase,
    pub last_finalized: Option<BlockRef>,
    pub highest_cc: Option<BlockRef>,
}

// ════════════════════════════════════════════════════════════════════════════
// ENGINE
// ════════════════════════════════════════════════════════════════════════════

/// A block validated against the committed head, with the state it yields.
struct Candidate {
    block: Block,
    view: StoreView,
}

pub struct ConsensusEngine {
    chain_id: String,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    validators: Arc<ValidatorManager>,
    store: ConsensusStore,
    key: Keypair,
    config: EngineConfig,
    state: ConsensusState,
    status: Arc<RwLock<ConsensusStatus>>,

    height: u64,
    round: u32,
    votes: Option<VoteSet>,
    candidates: BTreeMap<Hash, Candidate>,
    /// Certificate formed before its block arrived.
    pending_cc: Option<CommitCertificate>,
    future: BTreeMap<u64, Vec<Inbound>>,
    future_len: usize,

    propose_at: Option<u64>,
    round_deadline: Option<u64>,
    timeouts_at_height: u32,
    last_sync_request: Option<(u64, u64)>,
    halted: bool,
}

impl ConsensusEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        mempool: Arc<Mempool>,
        validators: Arc<ValidatorManager>,
        store: ConsensusStore,
        key: Keypair,
        config: EngineConfig,
    ) -> ConsensusResult<Self> {
        let state = store.load_state()?;
        Ok(Self {
            chain_id: ledger.chain_id().to_string(),
            ledger,
            mempool,
            validators,
            store,
            key,
            config,
            state,
            status: Arc::new(RwLock::new(ConsensusStatus::default())),
            height: 0,
            round: 0,
            votes: None,
            candidates: BTreeMap::new(),
            pending_cc: None,
            future: BTreeMap::new(),
            future_len: 0,
            propose_at: None,
            round_deadline: None,
            timeouts_at_height: 0,
            last_sync_request: None,
            halted: false,
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.key.address()
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.height
    }

    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    #[must_use]
    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared view of progress, updated on every transition.
    #[must_use]
    pub fn status_handle(&self) -> Arc<RwLock<ConsensusStatus>> {
        Arc::clone(&self.status)
    }

    /// Earliest time [`tick`](Self::tick) has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        if self.halted {
            return None;
        }
        match (self.propose_at, self.round_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // ENTRY POINTS
    // ════════════════════════════════════════════════════════════════════════

    /// Reconcile the persisted record with the ledger and enter the first
    /// undecided height.
    pub fn start(&mut self, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let result = self.start_inner(now_ms);
        self.check_fatal(result)
    }

    /// Adopt a restored ledger whose head is `anchor`. Both finality
    /// markers move to the anchor and the signing record is cleared. Only
    /// meaningful before [`start`](Self::start).
    pub fn reset_after_snapshot(&mut self, anchor: &Block) -> ConsensusResult<()> {
        let head = self.ledger.head()?;
        if head.height != anchor.height() || head.hash() != anchor.hash() {
            return Err(ConsensusError::SnapshotMismatch {
                height: anchor.height(),
                anchor: anchor.hash(),
                head: head.hash(),
            });
        }
        self.state = self.store.reset_after_snapshot(anchor)?;
        self.validators.clear_cache();
        self.future.clear();
        self.future_len = 0;
        info!(height = anchor.height(), hash = %anchor.hash().short(), "consensus reset to snapshot");
        self.publish_status();
        Ok(())
    }

    /// Process one message from `from`.
    pub fn handle_message(
        &mut self,
        from: Address,
        message: ConsensusMessage,
        now_ms: u64,
    ) -> ConsensusResult<Vec<Action>> {
        if self.halted {
            return Err(ConsensusError::Halted);
        }
        let result = self.dispatch(from, message, now_ms);
        self.check_fatal(result)
    }

    /// Fire the proposal timer and the round timeout if they are due.
    pub fn tick(&mut self, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        if self.halted {
            return Err(ConsensusError::Halted);
        }
        let mut actions = Vec::new();
        if self.propose_at.is_some_and(|at| now_ms >= at) {
            self.propose_at = None;
            let result = self.propose(now_ms);
            actions.extend(self.check_fatal(result)?);
        }
        if self.round_deadline.is_some_and(|at| now_ms >= at) {
            let result = self.handle_timeout(self.height, self.round, now_ms);
            actions.extend(self.check_fatal(result)?);
        }
        Ok(actions)
    }

    /// Round `round` at `height` expired without a certificate. Stale
    /// timeouts are ignored.
    pub fn handle_timeout(&mut self, height: u64, round: u32, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        if self.halted {
            return Err(ConsensusError::Halted);
        }
        if height != self.height || round != self.round {
            return Ok(Vec::new());
        }
        self.timeouts_at_height += 1;
        self.round += 1;
        let next = self.validators.proposer(height, self.round).ok();
        if self.timeouts_at_height >= self.config.liveness_alert_rounds {
            error!(
                height,
                round = self.round,
                timeouts = self.timeouts_at_height,
                "liveness fault: height is not finalizing"
            );
        } else {
            warn!(height, round, next_proposer = ?next, "round timed out");
        }
        self.enter_round(now_ms)?;

        // ask peers in case they finalized without us, and repeat our vote
        let mut actions = vec![Action::Broadcast(ConsensusMessage::DataRequest(
            DataRequest::BlockByHeight(height),
        ))];
        if let Some(vote) = self.state.vote_at(height) {
            actions.push(Action::Broadcast(ConsensusMessage::Vote(vote.clone())));
        }
        Ok(actions)
    }

    fn check_fatal<T>(&mut self, result: ConsensusResult<T>) -> ConsensusResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.halted {
                self.halted = true;
                self.propose_at = None;
                self.round_deadline = None;
                self.status.write().phase = Phase::Halted;
                error!(height = self.height, error = %e, "consensus halted");
            }
        }
        result
    }

    fn dispatch(&mut self, from: Address, message: ConsensusMessage, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        match message {
            ConsensusMessage::Proposal(p) => self.on_proposal(from, *p, now_ms),
            ConsensusMessage::Vote(v) => self.on_vote(from, v, now_ms),
            ConsensusMessage::DataRequest(r) => self.on_data_request(from, r),
            ConsensusMessage::DataResponse(r) => self.on_data_response(from, *r, now_ms),
            // attestation runs in its own task
            ConsensusMessage::CheckpointVote(_) => Ok(Vec::new()),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // HEIGHTS AND ROUNDS
    // ════════════════════════════════════════════════════════════════════════

    fn start_inner(&mut self, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let head = self.ledger.head()?;
        let finalized_height = self.state.last_finalized.map_or(0, |b| b.height);

        // finalized records the ledger has not committed yet
        for height in head.height + 1..=finalized_height {
            let record = self.store.finalized_at(height)?.ok_or_else(|| {
                ConsensusError::CommitFailed {
                    height,
                    reason: "finalized record missing".into(),
                }
            })?;
            let view = self.ledger.validate_block(&record.block).map_err(|e| ConsensusError::CommitFailed {
                height,
                reason: e.to_string(),
            })?;
            self.commit(&record.block, view)?;
            info!(height, "re-applied finalized block");
        }

        let head = self.ledger.head()?;
        let head_ref = BlockRef {
            height: head.height,
            hash: head.hash(),
        };
        match self.state.last_finalized {
            Some(f) if f.height == head.height && f.hash != head_ref.hash => {
                return Err(ConsensusError::ConflictingFinalizedBlock {
                    height: f.height,
                    finalized: f.hash,
                    conflicting: head_ref.hash,
                });
            }
            Some(f) if f.height >= head.height => {}
            _ if head.height > 0 => {
                // ledger restored ahead of the consensus record
                self.state.last_finalized = Some(head_ref);
                if self.state.highest_cc.map_or(true, |c| c.height < head.height) {
                    self.state.highest_cc = Some(head_ref);
                }
                self.store.save_state(&self.state)?;
            }
            _ => {}
        }

        self.height = head.height + 1;
        info!(
            height = self.height,
            address = %self.key.address(),
            "consensus started"
        );
        self.enter_height(now_ms)
    }

    fn enter_height(&mut self, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let set = self.validators.validator_set_for_height(self.height)?;
        self.votes = Some(VoteSet::new(&self.chain_id, self.height, set));
        self.round = 0;
        self.candidates.clear();
        self.pending_cc = None;
        self.timeouts_at_height = 0;
        self.enter_round(now_ms)?;

        let mut actions = Vec::new();
        // vote signed before a restart
        if let Some(vote) = self.state.vote_at(self.height).cloned() {
            actions.push(Action::Broadcast(ConsensusMessage::Vote(vote.clone())));
            match self.tally(vote, now_ms) {
                Ok(more) => actions.extend(more),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(height = self.height, error = %e, "own vote not counted"),
            }
        }

        let stale: Vec<u64> = self.future.range(..=self.height).map(|(h, _)| *h).collect();
        let mut replay = Vec::new();
        for h in stale {
            if let Some(msgs) = self.future.remove(&h) {
                self.future_len -= msgs.len();
                if h == self.height {
                    replay = msgs;
                }
            }
        }
        let height = self.height;
        for inbound in replay {
            if self.height != height {
                break;
            }
            match self.dispatch(inbound.from, inbound.message, now_ms) {
                Ok(more) => actions.extend(more),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(height, from = %inbound.from, error = %e, "dropping buffered message"),
            }
        }
        Ok(actions)
    }

    fn enter_round(&mut self, now_ms: u64) -> ConsensusResult<()> {
        self.round_deadline = Some(now_ms.saturating_add(self.config.round_timeout(self.round)));
        self.propose_at = None;
        if self.validators.proposer(self.height, self.round)? == self.key.address() {
            let delay = if self.round == 0 {
                self.config.block_interval_ms
            } else {
                0
            };
            self.propose_at = Some(now_ms.saturating_add(delay));
        }
        self.publish_status();
        Ok(())
    }

    fn publish_status(&self) {
        let mut status = self.status.write();
        status.height = self.height;
        status.round = self.round;
        status.phase = if self.halted {
            Phase::Halted
        } else if self.state.vote_at(self.height).is_some() {
            Phase::Tallying
        } else {
            Phase::CollectingProposals
        };
        status.last_finalized = self.state.last_finalized;
        status.highest_cc = self.state.highest_cc;
    }

    fn is_validator(&self) -> bool {
        self.votes
            .as_ref()
            .is_some_and(|v| v.validator_set().contains(&self.key.address()))
    }

    // ════════════════════════════════════════════════════════════════════════
    // PROPOSING AND VOTING
    // ════════════════════════════════════════════════════════════════════════

    fn propose(&mut self, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let (height, round) = (self.height, self.round);
        let block = match self.state.vote_at(height).map(|v| v.block_hash) {
            // re-propose what we already voted for
            Some(voted) => match self.candidates.get(&voted) {
                Some(c) => c.block.clone(),
                None => match self.state.proposal_at(height).filter(|p| p.block_hash() == voted) {
                    Some(p) => p.block.clone(),
                    None => {
                        warn!(height, round, "voted block unavailable, skipping proposal");
                        return Ok(Vec::new());
                    }
                },
            },
            None => {
                let parent = self.ledger.head()?;
                let txs = self.mempool.reap(self.config.max_txs_per_block);
                let proposed = self
                    .ledger
                    .propose_block(&parent, txs, self.key.address(), now_ms)?;
                let block = proposed.block.clone();
                self.candidates.insert(
                    block.hash(),
                    Candidate {
                        block: proposed.block,
                        view: proposed.view,
                    },
                );
                block
            }
        };

        let proposal = Proposal::new(&self.chain_id, block, round, &self.key)?;
        self.state.last_proposal = Some(proposal.clone());
        self.store.save_state(&self.state)?;
        info!(
            height,
            round,
            hash = %proposal.block_hash().short(),
            txs = proposal.block.txs.len(),
            "proposing block"
        );
        let mut actions = vec![Action::Broadcast(ConsensusMessage::Proposal(Box::new(
            proposal.clone(),
        )))];
        actions.extend(self.accept_proposal(proposal, now_ms)?);
        Ok(actions)
    }

    fn on_proposal(&mut self, from: Address, proposal: Proposal, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let height = proposal.height();
        if height < self.height {
            return Ok(Vec::new());
        }
        if height > self.height {
            self.buffer(from, ConsensusMessage::Proposal(Box::new(proposal)));
            return Ok(self.request_sync(from, now_ms));
        }
        let expected = self.validators.proposer(height, proposal.round)?;
        if proposal.proposer != expected {
            return Err(ConsensusError::WrongProposer {
                height,
                round: proposal.round,
                expected,
                got: proposal.proposer,
            });
        }
        proposal.verify(&self.chain_id)?;
        let builder = proposal.block.header.proposer;
        if builder != proposal.proposer
            && !self
                .votes
                .as_ref()
                .is_some_and(|v| v.validator_set().contains(&builder))
        {
            return Err(ConsensusError::InvalidProposal(format!(
                "re-proposed block was built by {}, not a validator",
                builder
            )));
        }
        self.accept_proposal(proposal, now_ms)
    }

    /// Validate the block once, then vote for it if we have not voted at
    /// this height.
    fn accept_proposal(&mut self, proposal: Proposal, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let hash = proposal.block_hash();
        if !self.candidates.contains_key(&hash) {
            let view = self.validate(&proposal.block)?;
            debug!(
                height = self.height,
                round = proposal.round,
                hash = %hash.short(),
                proposer = %proposal.proposer,
                "proposal accepted"
            );
            self.candidates.insert(
                hash,
                Candidate {
                    block: proposal.block,
                    view,
                },
            );
        }
        if self.pending_cc.as_ref().is_some_and(|cc| cc.block_hash == hash) {
            if let Some(cc) = self.pending_cc.take() {
                return self.finalize_candidate(cc, now_ms);
            }
        }
        if self.state.vote_at(self.height).is_none() && self.is_validator() {
            return self.cast_vote(hash, now_ms);
        }
        Ok(Vec::new())
    }

    fn validate(&self, block: &Block) -> ConsensusResult<StoreView> {
        self.ledger.validate_block(block).map_err(|e| {
            if e.is_fault() {
                ConsensusError::Ledger(e)
            } else {
                ConsensusError::InvalidProposal(e.to_string())
            }
        })
    }

    fn cast_vote(&mut self, block_hash: Hash, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        if let Some(voted) = self.state.vote_at(self.height) {
            if voted.block_hash != block_hash {
                return Err(ConsensusError::AlreadyVoted {
                    height: self.height,
                    voted: voted.block_hash,
                    attempted: block_hash,
                });
            }
            return Ok(Vec::new());
        }
        let vote = Vote::new(&self.chain_id, self.height, block_hash, &self.key)?;
        self.state.last_vote = Some(vote.clone());
        self.store.save_state(&self.state)?;
        debug!(height = self.height, round = self.round, hash = %block_hash.short(), "voted");
        self.publish_status();

        let mut actions = vec![Action::Broadcast(ConsensusMessage::Vote(vote.clone()))];
        actions.extend(self.tally(vote, now_ms)?);
        Ok(actions)
    }

    fn on_vote(&mut self, from: Address, vote: Vote, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        if vote.height < self.height {
            return Ok(Vec::new());
        }
        if vote.height > self.height {
            self.buffer(from, ConsensusMessage::Vote(vote));
            return Ok(self.request_sync(from, now_ms));
        }
        self.tally(vote, now_ms)
    }

    fn tally(&mut self, vote: Vote, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let votes = self
            .votes
            .as_mut()
            .ok_or_else(|| ConsensusError::InvalidVote("engine not started".into()))?;
        match votes.add(vote)? {
            AddVote::Certified(cc) => self.on_certificate(cc, now_ms),
            AddVote::Added { .. } | AddVote::Duplicate => Ok(Vec::new()),
        }
    }

    fn on_certificate(&mut self, cc: CommitCertificate, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        if self.candidates.contains_key(&cc.block_hash) {
            return self.finalize_candidate(cc, now_ms);
        }
        info!(
            height = cc.height,
            hash = %cc.block_hash.short(),
            "certificate formed before its block arrived"
        );
        let hash = cc.block_hash;
        self.pending_cc = Some(cc);
        Ok(vec![Action::Broadcast(ConsensusMessage::DataRequest(
            DataRequest::BlockByHash(hash),
        ))])
    }

    // ════════════════════════════════════════════════════════════════════════
    // FINALIZATION
    // ════════════════════════════════════════════════════════════════════════

    fn finalize_candidate(&mut self, cc: CommitCertificate, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        let candidate = self.candidates.remove(&cc.block_hash).ok_or_else(|| {
            ConsensusError::InvalidCertificate(format!("no block for {}", cc.block_hash.short()))
        })?;
        self.finalize(candidate.block, candidate.view, cc, now_ms)
    }

    fn finalize(
        &mut self,
        block: Block,
        view: StoreView,
        cc: CommitCertificate,
        now_ms: u64,
    ) -> ConsensusResult<Vec<Action>> {
        let r = BlockRef::of(&block);
        if r.height != self.height {
            return Err(ConsensusError::InvalidCertificate(format!(
                "certificate for height {} while deciding {}",
                r.height, self.height
            )));
        }
        let voters = cc.votes.len();
        let record = FinalizedBlock {
            block,
            cc: Some(cc),
        };
        self.store.put_finalized(&record)?;
        self.state.last_finalized = Some(r);
        self.state.highest_cc = Some(r);
        self.store.save_state(&self.state)?;
        self.commit(&record.block, view)?;

        let tx_ids: Vec<Hash> = record
            .block
            .txs
            .iter()
            .filter_map(|tx| tx.tx_id(&self.chain_id).ok())
            .collect();
        self.mempool.update(&tx_ids);
        info!(
            height = r.height,
            round = self.round,
            hash = %r.hash.short(),
            txs = tx_ids.len(),
            voters,
            "block finalized"
        );

        let mut actions = vec![Action::Finalized(record)];
        self.height = r.height + 1;
        actions.extend(self.enter_height(now_ms)?);
        Ok(actions)
    }

    fn commit(&self, block: &Block, view: StoreView) -> ConsensusResult<()> {
        self.ledger
            .commit_block(block, view)
            .map_err(|e: LedgerError| ConsensusError::CommitFailed {
                height: block.height(),
                reason: e.to_string(),
            })
    }

    // ════════════════════════════════════════════════════════════════════════
    // DATA EXCHANGE AND CATCH-UP
    // ════════════════════════════════════════════════════════════════════════

    fn on_data_request(&mut self, from: Address, request: DataRequest) -> ConsensusResult<Vec<Action>> {
        let response = match request {
            DataRequest::BlockByHeight(height) => self
                .store
                .finalized_at(height)?
                .filter(|f| f.cc.is_some())
                .map(DataResponse::Block),
            DataRequest::BlockByHash(hash) => match self.candidates.get(&hash) {
                Some(c) => Some(DataResponse::Block(FinalizedBlock {
                    block: c.block.clone(),
                    cc: None,
                })),
                None => self.store.finalized_by_hash(&hash)?.map(DataResponse::Block),
            },
            DataRequest::Txs(ids) => {
                let raws: Vec<Vec<u8>> = ids
                    .iter()
                    .filter_map(|id| self.mempool.get(id))
                    .filter_map(|tx| tx.to_bytes().ok())
                    .collect();
                (!raws.is_empty()).then_some(DataResponse::Txs(raws))
            }
        };
        Ok(response
            .map(|r| Action::Send {
                to: from,
                message: ConsensusMessage::DataResponse(Box::new(r)),
            })
            .into_iter()
            .collect())
    }

    fn on_data_response(&mut self, from: Address, response: DataResponse, now_ms: u64) -> ConsensusResult<Vec<Action>> {
        match response {
            DataResponse::Txs(raws) => {
                for raw in raws {
                    if let Err(e) = self.mempool.insert(&raw) {
                        debug!(from = %from, error = %e, "gossiped tx not admitted");
                    }
                }
                Ok(Vec::new())
            }
            DataResponse::Block(FinalizedBlock { block, cc: Some(cc) }) => {
                self.on_certified_block(from, block, cc, now_ms)
            }
            DataResponse::Block(FinalizedBlock { block, cc: None }) => {
                let hash = block.hash();
                let wanted = block.height() == self.height
                    && self.pending_cc.as_ref().is_some_and(|cc| cc.block_hash == hash);
                if !wanted {
                    return Ok(Vec::new());
                }
                let view = self.validate(&block)?;
                self.candidates.insert(hash, Candidate { block, view });
                match self.pending_cc.take() {
                    Some(cc) => self.finalize_candidate(cc, now_ms),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    fn on_certified_block(
        &mut self,
        from: Address,
        block: Block,
        cc: CommitCertificate,
        now_ms: u64,
    ) -> ConsensusResult<Vec<Action>> {
        let r = BlockRef::of(&block);
        if cc.block_ref() != r {
            return Err(ConsensusError::InvalidCertificate(
                "certificate does not match block".into(),
            ));
        }
        if r.height < self.height {
            let Some(ours) = self.store.finalized_at(r.height)? else {
                return Ok(Vec::new());
            };
            let finalized = ours.block.hash();
            if finalized == r.hash {
                return Ok(Vec::new());
            }
            let set = self.validators.validator_set_for_height(r.height)?;
            cc.verify(&set, &self.chain_id)?;
            return Err(ConsensusError::ConflictingFinalizedBlock {
                height: r.height,
                finalized,
                conflicting: r.hash,
            });
        }
        if r.height > self.height {
            return Ok(vec![Action::Send {
                to: from,
                message: ConsensusMessage::DataRequest(DataRequest::BlockByHeight(self.height)),
            }]);
        }

        let set = self.validators.validator_set_for_height(r.height)?;
        cc.verify(&set, &self.chain_id)?;
        let view = match self.candidates.remove(&r.hash) {
            Some(c) => c.view,
            None => self.validate(&block)?,
        };
        info!(height = r.height, from = %from, "finalizing from peer certificate");
        let mut actions = self.finalize(block, view, cc, now_ms)?;
        // the peer may be further ahead
        actions.push(Action::Send {
            to: from,
            message: ConsensusMessage::DataRequest(DataRequest::BlockByHeight(self.height)),
        });
        Ok(actions)
    }

    fn buffer(&mut self, from: Address, message: ConsensusMessage) {
        let Some(height) = message.height() else {
            return;
        };
        if height > self.height + FUTURE_HEIGHTS || self.future_len >= MAX_FUTURE_MESSAGES {
            return;
        }
        self.future_len += 1;
        self.future
            .entry(height)
            .or_default()
            .push(Inbound { from, message });
    }

    /// Ask `from` for the block at our height, at most once per round
    /// timeout.
    fn request_sync(&mut self, from: Address, now_ms: u64) -> Vec<Action> {
        if let Some((height, at)) = self.last_sync_request {
            if height == self.height && now_ms < at.saturating_add(self.config.round_timeout_ms) {
                return Vec::new();
            }
        }
        self.last_sync_request = Some((self.height, now_ms));
        vec![Action::Send {
            to: from,
            message: ConsensusMessage::DataRequest(DataRequest::BlockByHeight(self.height)),
        }]
    }
}
