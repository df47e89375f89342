//! Consensus authority task.
//!
//! The only task that touches the [`ConsensusEngine`], and so the only
//! writer of ledger state. Receivers push [`Inbound`] messages into its
//! queue; it sleeps until the engine's next deadline otherwise.
//!
//! ```text
//!   transport ──mpsc<Inbound>──► authority ──► engine.handle_message / tick
//!                                  │                    │
//!                                  │ CheckpointVote     │ Actions
//!                                  ▼                    ▼
//!                          attestor queue     network / finalized events
//! ```
//!
//! A fatal engine error ends the task with that error. Other errors are
//! logged, at `warn!` when they are protocol violations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointVote;
use crate::engine::{Action, ConsensusEngine};
use crate::error::ConsensusResult;
use crate::message::{ConsensusMessage, Inbound};
use crate::network::Network;
use crate::now_ms;
use crate::state::FinalizedBlock;

/// Wake-up interval when the engine has no deadline (e.g. not a validator).
const IDLE_POLL_MS: u64 = 1_000;

pub struct Authority {
    engine: ConsensusEngine,
    network: Arc<dyn Network>,
    inbound: mpsc::Receiver<Inbound>,
    checkpoint_votes: mpsc::Sender<CheckpointVote>,
    finalized: broadcast::Sender<FinalizedBlock>,
    cancel: CancellationToken,
}

impl Authority {
    pub fn new(
        engine: ConsensusEngine,
        network: Arc<dyn Network>,
        inbound: mpsc::Receiver<Inbound>,
        checkpoint_votes: mpsc::Sender<CheckpointVote>,
        finalized: broadcast::Sender<FinalizedBlock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            network,
            inbound,
            checkpoint_votes,
            finalized,
            cancel,
        }
    }

    pub async fn run(mut self) -> ConsensusResult<()> {
        let actions = self.engine.start(now_ms())?;
        self.execute(actions).await;

        loop {
            let wait = self
                .engine
                .next_deadline()
                .map(|d| d.saturating_sub(now_ms()))
                .unwrap_or(IDLE_POLL_MS);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(height = self.engine.height(), "consensus authority stopping");
                    return Ok(());
                }

                inbound = self.inbound.recv() => {
                    let Some(inbound) = inbound else {
                        info!("inbound queue closed, consensus authority stopping");
                        return Ok(());
                    };
                    if let ConsensusMessage::CheckpointVote(vote) = inbound.message {
                        if let Err(e) = self.checkpoint_votes.try_send(vote) {
                            debug!(error = %e, "checkpoint vote dropped");
                        }
                        continue;
                    }
                    let from = inbound.from;
                    let kind = inbound.message.kind();
                    let result = self.engine.handle_message(from, inbound.message, now_ms());
                    self.settle(result, kind, Some(from)).await?;
                }

                _ = tokio::time::sleep(Duration::from_millis(wait)) => {
                    let result = self.engine.tick(now_ms());
                    self.settle(result, "tick", None).await?;
                }
            }
        }
    }

    async fn settle(
        &mut self,
        result: ConsensusResult<Vec<Action>>,
        kind: &'static str,
        from: Option<scpt_common::Address>,
    ) -> ConsensusResult<()> {
        match result {
            Ok(actions) => {
                self.execute(actions).await;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) if e.is_security_event() => {
                warn!(kind, from = ?from, error = %e, "protocol violation");
                Ok(())
            }
            Err(e) => {
                debug!(kind, from = ?from, error = %e, "message rejected");
                Ok(())
            }
        }
    }

    async fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => {
                    let kind = message.kind();
                    if let Err(e) = self.network.broadcast(message).await {
                        warn!(kind, error = %e, "broadcast failed");
                    }
                }
                Action::Send { to, message } => {
                    let kind = message.kind();
                    if let Err(e) = self.network.send(to, message).await {
                        debug!(kind, peer = %to, error = %e, "send failed");
                    }
                }
                Action::Finalized(record) => {
                    // no subscribers is fine
                    let _ = self.finalized.send(record);
                }
            }
        }
    }
}
