//! Gossip messages exchanged between nodes.
//!
//! The transport carries opaque bytes; [`ConsensusMessage::to_bytes`] and
//! [`ConsensusMessage::from_bytes`] are the only codec.

use serde::{Deserialize, Serialize};

use scpt_common::{Address, Hash};

use crate::checkpoint::CheckpointVote;
use crate::error::ConsensusResult;
use crate::state::FinalizedBlock;
use crate::types::{Proposal, Vote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRequest {
    /// Finalized block at a height, with its certificate.
    BlockByHeight(u64),
    /// A block by hash, finalized or still being voted on.
    BlockByHash(Hash),
    /// Raw pending transactions.
    Txs(Vec<Hash>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataResponse {
    /// `cc` is `None` when the block is not finalized at the responder.
    Block(FinalizedBlock),
    Txs(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Box<Proposal>),
    Vote(Vote),
    DataRequest(DataRequest),
    DataResponse(Box<DataResponse>),
    CheckpointVote(CheckpointVote),
}

impl ConsensusMessage {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Proposal(_) => "proposal",
            ConsensusMessage::Vote(_) => "vote",
            ConsensusMessage::DataRequest(_) => "data_request",
            ConsensusMessage::DataResponse(_) => "data_response",
            ConsensusMessage::CheckpointVote(_) => "checkpoint_vote",
        }
    }

    /// Height the message refers to, if any. Used to buffer messages
    /// that arrive ahead of the local node.
    #[must_use]
    pub fn height(&self) -> Option<u64> {
        match self {
            ConsensusMessage::Proposal(p) => Some(p.height()),
            ConsensusMessage::Vote(v) => Some(v.height),
            ConsensusMessage::CheckpointVote(v) => Some(v.height),
            ConsensusMessage::DataRequest(_) | ConsensusMessage::DataResponse(_) => None,
        }
    }

    pub fn to_bytes(&self) -> ConsensusResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> ConsensusResult<Self> {
        Ok(bincode::deserialize(raw)?)
    }
}

/// A message together with the peer it came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: Address,
    pub message: ConsensusMessage,
}
