use scpt_common::{BlsError, CryptoError};
use scpt_consensus::ConsensusError;
use scpt_ledger::{GenesisError, LedgerError};
use scpt_storage::StoreError;
use scpt_validator::ValidatorError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("genesis: {0}")]
    Genesis(#[from] GenesisError),

    #[error("node key: {0}")]
    Key(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("node already started")]
    AlreadyStarted,

    #[error("task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for NodeError {
    fn from(e: CryptoError) -> Self {
        NodeError::Key(e.to_string())
    }
}

impl From<BlsError> for NodeError {
    fn from(e: BlsError) -> Self {
        NodeError::Key(e.to_string())
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
