//! Transport abstraction.
//!
//! Consensus needs best-effort broadcast and point-to-point delivery,
//! addressed by peer identity (the peer's account address). There is no
//! ordering guarantee across peers. Inbound traffic is not part of the
//! trait: the transport pushes [`Inbound`](crate::message::Inbound)
//! messages into the node's channel.
//!
//! `Network` is object-safe and used as `Arc<dyn Network>`.

use async_trait::async_trait;
use thiserror::Error;

use scpt_common::Address;

use crate::message::ConsensusMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("peer not found: {0}")]
    PeerNotFound(Address),

    #[error("peer {0} is not accepting messages")]
    PeerUnavailable(Address),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("network has been shut down")]
    Shutdown,
}

#[async_trait]
pub trait Network: Send + Sync {
    /// Deliver to every connected peer except ourselves.
    async fn broadcast(&self, msg: ConsensusMessage) -> Result<(), NetworkError>;

    /// Deliver to one peer.
    async fn send(&self, peer: Address, msg: ConsensusMessage) -> Result<(), NetworkError>;

    /// Our own identity on the network.
    fn local_id(&self) -> Address;
}
