//! Node context: owns every component and the lifecycle of its tasks.
//!
//! ```text
//!                 ┌────────────────────────── Node ───────────────────────────┐
//!   transport ──► │ inbound mpsc ──► Authority task ──► Ledger (single writer)│
//!                 │                     │   │                                 │
//!                 │    CheckpointVote ◄─┘   └─► finalized broadcast ──┐       │
//!                 │          │                                        ▼       │
//!                 │          └──────────────► attestor task ◄─────────┘       │
//!                 │ RpcService: reads ledger / mempool / status, submits txs  │
//!                 └───────────────────────────────────────────────────────────┘
//! ```
//!
//! `start` spawns the tasks, `stop` cancels them without waiting and
//! `wait` joins them. A fatal consensus error ends the authority task,
//! which cancels the rest of the node; `wait` returns that error.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scpt_common::Address;
use scpt_consensus::{
    run_attestor, AttestorIdentity, Authority, CheckpointAttestor, CheckpointVote,
    ConsensusEngine, ConsensusStatus, ConsensusStore, FinalizedBlock, Inbound, Network,
};
use scpt_ledger::{Block, Genesis, KvVm, Ledger, Mempool};
use scpt_storage::{KvStore, MemoryStore};
use scpt_validator::ValidatorManager;

use crate::config::{ConfigError, NodeConfig};
use crate::error::{NodeError, NodeResult};
use crate::key::NodeKey;
use crate::rpc::RpcService;

/// File under `data_dir` holding the persisted store image.
pub const STATE_FILE: &str = "state.bin";

const INBOUND_QUEUE: usize = 4_096;
const CHECKPOINT_VOTE_QUEUE: usize = 1_024;
const FINALIZED_EVENTS: usize = 256;

/// Parts consumed by `start`.
struct Pending {
    engine: ConsensusEngine,
    attestor: CheckpointAttestor,
    inbound: mpsc::Receiver<Inbound>,
}

pub struct Node {
    config: NodeConfig,
    address: Address,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    validators: Arc<ValidatorManager>,
    consensus: ConsensusStore,
    network: Arc<dyn Network>,
    status: Arc<RwLock<ConsensusStatus>>,
    inbound: mpsc::Sender<Inbound>,
    finalized: broadcast::Sender<FinalizedBlock>,
    cancel: CancellationToken,
    pending: Mutex<Option<Pending>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<NodeResult<()>>)>>,
}

impl Node {
    /// Open (or create) the node's state and build every component.
    /// Nothing runs until [`start`](Self::start).
    pub fn new(
        config: NodeConfig,
        genesis: &Genesis,
        key: NodeKey,
        network: Arc<dyn Network>,
    ) -> NodeResult<Self> {
        config.validate()?;
        if genesis.chain_id != config.chain_id {
            return Err(ConfigError::Invalid(format!(
                "genesis is for chain {}, config says {}",
                genesis.chain_id, config.chain_id
            ))
            .into());
        }
        let address = key.address();
        if network.local_id() != address {
            return Err(NodeError::Key(format!(
                "network identity {} is not the node key {}",
                network.local_id(),
                address
            )));
        }

        let store = open_store(config.data_dir.as_deref())?;
        let ledger = Arc::new(Ledger::new(&config.chain_id, Arc::clone(&store), Arc::new(KvVm))?);
        ledger.init_genesis(genesis)?;
        let mempool = Arc::new(Mempool::new(Arc::clone(&ledger), config.mempool.capacity));
        let validators = Arc::new(ValidatorManager::new(ledger.clone(), config.epoch));
        let consensus = ConsensusStore::new(Arc::clone(&store));

        let engine = ConsensusEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&mempool),
            Arc::clone(&validators),
            consensus.clone(),
            key.keypair.clone(),
            config.consensus.clone(),
        )?;
        let status = engine.status_handle();

        let bls_member = key.bls.is_some();
        let identity = key.bls.map(|bls| AttestorIdentity { address, bls });
        let attestor = CheckpointAttestor::new(
            &config.chain_id,
            Arc::clone(&validators),
            consensus.clone(),
            identity,
            config.checkpoint.soft_deadline_ms,
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (finalized, _) = broadcast::channel(FINALIZED_EVENTS);

        info!(
            chain = %config.chain_id,
            %address,
            height = ledger.committed_height().unwrap_or(0),
            persistent = config.data_dir.is_some(),
            attestor = bls_member,
            "node initialized"
        );

        Ok(Self {
            config,
            address,
            ledger,
            mempool,
            validators,
            consensus,
            network,
            status,
            inbound: inbound_tx,
            finalized,
            cancel: CancellationToken::new(),
            pending: Mutex::new(Some(Pending {
                engine,
                attestor,
                inbound: inbound_rx,
            })),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the consensus authority and the checkpoint attestor. Must be
    /// called from inside a tokio runtime.
    pub fn start(&self) -> NodeResult<()> {
        let Pending {
            engine,
            attestor,
            inbound,
        } = self.pending.lock().take().ok_or(NodeError::AlreadyStarted)?;

        let (votes_tx, votes_rx) = mpsc::channel::<CheckpointVote>(CHECKPOINT_VOTE_QUEUE);
        let finalized_rx = self.finalized.subscribe();

        let authority = Authority::new(
            engine,
            Arc::clone(&self.network),
            inbound,
            votes_tx,
            self.finalized.clone(),
            self.cancel.clone(),
        );
        let cancel = self.cancel.clone();
        let consensus_task = tokio::spawn(async move {
            let result = authority.run().await;
            if let Err(e) = &result {
                error!(error = %e, "consensus stopped, shutting the node down");
                cancel.cancel();
            }
            result.map_err(NodeError::from)
        });

        let network = Arc::clone(&self.network);
        let cancel = self.cancel.clone();
        let attestor_task = tokio::spawn(async move {
            run_attestor(attestor, finalized_rx, votes_rx, network, cancel).await;
            Ok::<(), NodeError>(())
        });

        let mut tasks = self.tasks.lock();
        tasks.push(("consensus", consensus_task));
        tasks.push(("attestor", attestor_task));
        info!(address = %self.address, "node started");
        Ok(())
    }

    /// Request shutdown. Returns immediately; use [`wait`](Self::wait) to
    /// join the tasks.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(address = %self.address, "node stopping");
        }
        self.cancel.cancel();
    }

    /// Join every task. Returns the first task error, e.g. the fatal
    /// consensus error that halted the node.
    pub async fn wait(&self) -> NodeResult<()> {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let mut first_error = None;
        for (name, joined) in names.into_iter().zip(futures::future::join_all(handles).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(NodeError::Task(format!("{} task: {}", name, e))),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        info!(address = %self.address, "node stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Adopt a ledger restored from a snapshot whose last block is
    /// `anchor`. Must be called before [`start`](Self::start).
    pub fn reset_after_snapshot(&self, anchor: &Block) -> NodeResult<()> {
        let mut pending = self.pending.lock();
        let pending = pending.as_mut().ok_or(NodeError::AlreadyStarted)?;
        pending.engine.reset_after_snapshot(anchor)?;
        self.mempool.update(&[]);
        Ok(())
    }

    /// Query surface over this node's state.
    #[must_use]
    pub fn rpc(&self) -> RpcService {
        RpcService::new(
            &self.config.chain_id,
            self.address,
            Arc::clone(&self.ledger),
            Arc::clone(&self.mempool),
            Arc::clone(&self.validators),
            self.consensus.clone(),
            Arc::clone(&self.status),
            self.finalized.clone(),
            Arc::clone(&self.network),
            Duration::from_millis(self.config.rpc.tx_timeout_ms),
        )
    }

    /// Queue the transport pushes received messages into.
    #[must_use]
    pub fn inbound(&self) -> mpsc::Sender<Inbound> {
        self.inbound.clone()
    }

    pub fn subscribe_finalized(&self) -> broadcast::Receiver<FinalizedBlock> {
        self.finalized.subscribe()
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    #[must_use]
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    #[must_use]
    pub fn status(&self) -> ConsensusStatus {
        self.status.read().clone()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown was requested or a task failed.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }
}

fn open_store(data_dir: Option<&Path>) -> NodeResult<Arc<dyn KvStore>> {
    match data_dir {
        None => Ok(Arc::new(MemoryStore::new())),
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Ok(Arc::new(MemoryStore::open(dir.join(STATE_FILE))?))
        }
    }
}
