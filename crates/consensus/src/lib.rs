//! # SCPT Consensus
//!
//! Stake-weighted BFT finality for the SCPT chain, plus the checkpoint
//! attestation layer on top of it.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `types` | `Proposal`, `Vote`, `CommitCertificate`, `BlockRef` |
//! | `vote_set` | per-height tally with equivocation detection |
//! | `state` | persisted `ConsensusState`, finalized blocks, attestations |
//! | `message` | gossip messages and their codec |
//! | `network` | `Network` transport trait |
//! | `engine` | `ConsensusEngine` state machine |
//! | `authority` | async task owning the engine |
//! | `checkpoint` | BLS checkpoint votes, aggregation, attestor task |
//!
//! A block is final once votes from more than two thirds of the height's
//! validator power name it. Finality is never reverted: a conflicting
//! certificate for a finalized height halts the node.

pub mod authority;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod message;
pub mod network;
pub mod state;
pub mod types;
pub mod vote_set;

pub use authority::Authority;
pub use checkpoint::{
    run_attestor, AttestorIdentity, CheckpointAggregator, CheckpointAttestation,
    CheckpointAttestor, CheckpointVote,
};
pub use engine::{Action, ConsensusEngine, ConsensusStatus, EngineConfig, Phase};
pub use error::{ConsensusError, ConsensusResult};
pub use message::{ConsensusMessage, DataRequest, DataResponse, Inbound};
pub use network::{Network, NetworkError};
pub use state::{ConsensusState, ConsensusStore, FinalizedBlock};
pub use types::{BlockRef, CommitCertificate, Proposal, Vote};
pub use vote_set::{AddVote, VoteSet};

/// Wall-clock milliseconds. Only used for timers and block timestamps,
/// never by ledger rules.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
