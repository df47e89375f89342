//! Consensus error taxonomy.
//!
//! | Variant group | Meaning | Handling |
//! |---------------|---------|----------|
//! | invalid message | bad signature, wrong proposer, stale height | drop message, log |
//! | protocol violation | equivocating vote | drop message, log as security event |
//! | safety violation | conflicting finalized block | halt the node |
//! | fault | ledger or storage failure after validation | halt the node |

use scpt_common::{Address, BlsError, Hash};
use scpt_ledger::LedgerError;
use scpt_storage::StoreError;
use scpt_validator::ValidatorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    // ─────────────────────────────────────────────────────────────────────────
    // invalid messages
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("proposal for height {height} round {round} from {got}, expected {expected}")]
    WrongProposer {
        height: u64,
        round: u32,
        expected: Address,
        got: Address,
    },

    #[error("invalid vote: {0}")]
    InvalidVote(String),

    #[error("invalid signature from {0}")]
    InvalidSignature(Address),

    #[error("{0} is not in the validator set for height {1}")]
    UnknownValidator(Address, u64),

    #[error("invalid commit certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid checkpoint vote: {0}")]
    InvalidCheckpointVote(String),

    // ─────────────────────────────────────────────────────────────────────────
    // protocol violations
    // ─────────────────────────────────────────────────────────────────────────
    #[error("equivocation by {voter} at height {height}: {first} and {second}")]
    Equivocation {
        voter: Address,
        height: u64,
        first: Hash,
        second: Hash,
    },

    #[error("refusing to vote {attempted} at height {height}, already voted {voted}")]
    AlreadyVoted {
        height: u64,
        voted: Hash,
        attempted: Hash,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // safety violations (fatal)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("conflicting finalized block at height {height}: have {finalized}, got {conflicting}")]
    ConflictingFinalizedBlock {
        height: u64,
        finalized: Hash,
        conflicting: Hash,
    },

    #[error("failed to commit finalized block {height}: {reason}")]
    CommitFailed { height: u64, reason: String },

    #[error("consensus halted")]
    Halted,

    #[error("snapshot anchor {anchor} at height {height} does not match ledger head {head}")]
    SnapshotMismatch { height: u64, anchor: Hash, head: Hash },

    // ─────────────────────────────────────────────────────────────────────────
    // collaborators
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bls(#[from] BlsError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("network error: {0}")]
    Network(String),
}

impl ConsensusError {
    /// Errors after which the local node must stop making progress.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            ConsensusError::ConflictingFinalizedBlock { .. }
            | ConsensusError::CommitFailed { .. }
            | ConsensusError::Halted => true,
            ConsensusError::Store(_) => true,
            ConsensusError::Ledger(e) => e.is_fault(),
            _ => false,
        }
    }

    /// Protocol violations worth a security log line.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            ConsensusError::Equivocation { .. }
                | ConsensusError::WrongProposer { .. }
                | ConsensusError::InvalidSignature(_)
                | ConsensusError::ConflictingFinalizedBlock { .. }
        )
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

impl From<bincode::Error> for ConsensusError {
    fn from(e: bincode::Error) -> Self {
        ConsensusError::Codec(e.to_string())
    }
}
