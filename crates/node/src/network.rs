//! In-process transport.
//!
//! [`LocalHub`] connects the nodes of one process. Every message is
//! encoded on send and decoded on delivery, so the hub exercises the same
//! codec a wire transport would. Delivery is best effort: a full or
//! closed inbound queue drops the message. Peers can be taken offline to
//! simulate partitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use scpt_common::Address;
use scpt_consensus::{ConsensusMessage, Inbound, Network, NetworkError};

#[derive(Default)]
pub struct LocalHub {
    peers: RwLock<BTreeMap<Address, mpsc::Sender<Inbound>>>,
    offline: RwLock<BTreeSet<Address>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route messages for `address` into `inbound`.
    pub fn register(&self, address: Address, inbound: mpsc::Sender<Inbound>) {
        self.peers.write().insert(address, inbound);
    }

    pub fn unregister(&self, address: &Address) {
        self.peers.write().remove(address);
    }

    /// While offline, nothing is delivered to or from `address`.
    pub fn set_offline(&self, address: Address, offline: bool) {
        let mut set = self.offline.write();
        if offline {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    #[must_use]
    pub fn peers(&self) -> Vec<Address> {
        self.peers.read().keys().copied().collect()
    }

    /// Transport handle for the node `local`.
    pub fn endpoint(self: &Arc<Self>, local: Address) -> Arc<LocalNetwork> {
        Arc::new(LocalNetwork {
            hub: Arc::clone(self),
            local,
        })
    }

    fn is_offline(&self, address: &Address) -> bool {
        self.offline.read().contains(address)
    }

    fn deliver(&self, from: Address, to: Address, raw: &[u8]) -> Result<(), NetworkError> {
        if self.is_offline(&from) || self.is_offline(&to) {
            trace!(%from, %to, "dropped by partition");
            return Ok(());
        }
        let sender = self
            .peers
            .read()
            .get(&to)
            .cloned()
            .ok_or(NetworkError::PeerNotFound(to))?;
        let message =
            ConsensusMessage::from_bytes(raw).map_err(|e| NetworkError::Encoding(e.to_string()))?;
        sender
            .try_send(Inbound { from, message })
            .map_err(|_| NetworkError::PeerUnavailable(to))
    }
}

pub struct LocalNetwork {
    hub: Arc<LocalHub>,
    local: Address,
}

#[async_trait]
impl Network for LocalNetwork {
    async fn broadcast(&self, msg: ConsensusMessage) -> Result<(), NetworkError> {
        let raw = msg
            .to_bytes()
            .map_err(|e| NetworkError::Encoding(e.to_string()))?;
        for peer in self.hub.peers() {
            if peer == self.local {
                continue;
            }
            if let Err(e) = self.hub.deliver(self.local, peer, &raw) {
                debug!(kind = msg.kind(), %peer, error = %e, "broadcast delivery failed");
            }
        }
        Ok(())
    }

    async fn send(&self, peer: Address, msg: ConsensusMessage) -> Result<(), NetworkError> {
        let raw = msg
            .to_bytes()
            .map_err(|e| NetworkError::Encoding(e.to_string()))?;
        self.hub.deliver(self.local, peer, &raw)
    }

    fn local_id(&self) -> Address {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpt_common::{Hash, Keypair};
    use scpt_consensus::{DataRequest, Vote};

    fn addr(seed: u8) -> Address {
        Keypair::from_seed(seed).address()
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let hub = LocalHub::new();
        let mut queues = Vec::new();
        for seed in 1..=3 {
            let (tx, rx) = mpsc::channel(8);
            hub.register(addr(seed), tx);
            queues.push(rx);
        }
        let vote = Vote::new("net-test", 1, Hash::ZERO, &Keypair::from_seed(1)).unwrap();
        hub.endpoint(addr(1))
            .broadcast(ConsensusMessage::Vote(vote.clone()))
            .await
            .unwrap();

        assert!(queues[0].try_recv().is_err());
        for q in &mut queues[1..] {
            let got = q.try_recv().unwrap();
            assert_eq!(got.from, addr(1));
            assert_eq!(got.message, ConsensusMessage::Vote(vote.clone()));
        }
    }

    #[tokio::test]
    async fn partitions_and_unknown_peers() {
        let hub = LocalHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register(addr(2), tx);
        let net = hub.endpoint(addr(1));
        let msg = ConsensusMessage::DataRequest(DataRequest::BlockByHeight(4));

        assert_eq!(
            net.send(addr(9), msg.clone()).await,
            Err(NetworkError::PeerNotFound(addr(9)))
        );

        hub.set_offline(addr(2), true);
        net.send(addr(2), msg.clone()).await.unwrap();
        assert!(rx.try_recv().is_err());

        hub.set_offline(addr(2), false);
        net.send(addr(2), msg.clone()).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().message, msg);
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let hub = LocalHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.register(addr(2), tx);
        let net = hub.endpoint(addr(1));
        let msg = ConsensusMessage::DataRequest(DataRequest::Txs(vec![]));
        net.send(addr(2), msg.clone()).await.unwrap();
        assert_eq!(
            net.send(addr(2), msg).await,
            Err(NetworkError::PeerUnavailable(addr(2)))
        );
    }
}
