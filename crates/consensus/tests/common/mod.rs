//! Deterministic multi-node harness: engines exchange messages through an
//! in-memory queue and a simulated clock.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use scpt_common::{tokens, Address, Coins, Keypair};
use scpt_consensus::{
    Action, ConsensusEngine, ConsensusError, ConsensusMessage, ConsensusStore, EngineConfig,
    FinalizedBlock,
};
use scpt_ledger::{
    Genesis, GenesisAccount, GenesisStake, KvVm, Ledger, Mempool, StakePurpose,
};
use scpt_storage::{KvStore, MemoryStore};
use scpt_validator::{EpochConfig, ValidatorManager};

pub const CHAIN: &str = "consensus-tests";

pub fn config() -> EngineConfig {
    EngineConfig {
        round_timeout_ms: 1_000,
        timeout_backoff_num: 3,
        timeout_backoff_den: 2,
        max_round_timeout_ms: 8_000,
        block_interval_ms: 100,
        max_txs_per_block: 100,
        liveness_alert_rounds: 3,
    }
}

/// Genesis with one 200k SCPT validator stake per seed and the given
/// funded accounts.
pub fn genesis(seeds: &[u8], accounts: Vec<(Address, Coins)>) -> Genesis {
    Genesis {
        chain_id: CHAIN.into(),
        accounts: accounts
            .into_iter()
            .map(|(address, coins)| GenesisAccount { address, coins })
            .collect(),
        stakes: seeds
            .iter()
            .map(|s| GenesisStake {
                source: Address::from_bytes([0xee; 20]),
                holder: Keypair::from_seed(*s).address(),
                amount: tokens(200_000),
                purpose: StakePurpose::Validator,
                bls_pubkey: None,
            })
            .collect(),
    }
}

pub struct TestNode {
    pub seed: u8,
    pub store: Arc<dyn KvStore>,
    pub ledger: Arc<Ledger>,
    pub mempool: Arc<Mempool>,
    pub validators: Arc<ValidatorManager>,
    pub engine: ConsensusEngine,
}

impl TestNode {
    /// Open a node over `store`, committing genesis if the store is fresh.
    pub fn open(seed: u8, genesis: &Genesis, store: Arc<dyn KvStore>) -> Self {
        let ledger = Arc::new(Ledger::new(CHAIN, store.clone(), Arc::new(KvVm)).unwrap());
        if ledger.committed_height().is_none() {
            ledger.init_genesis(genesis).unwrap();
        }
        let mempool = Arc::new(Mempool::new(ledger.clone(), 1_000));
        let validators = Arc::new(ValidatorManager::new(ledger.clone(), EpochConfig::default()));
        let engine = ConsensusEngine::new(
            ledger.clone(),
            mempool.clone(),
            validators.clone(),
            ConsensusStore::new(store.clone()),
            Keypair::from_seed(seed),
            config(),
        )
        .unwrap();
        Self {
            seed,
            store,
            ledger,
            mempool,
            validators,
            engine,
        }
    }

    pub fn address(&self) -> Address {
        Keypair::from_seed(self.seed).address()
    }

    pub fn height(&self) -> u64 {
        self.ledger.committed_height().unwrap_or(0)
    }
}

enum Envelope {
    Broadcast(ConsensusMessage),
    Send(Address, ConsensusMessage),
}

pub struct Net {
    pub nodes: Vec<TestNode>,
    pub offline: BTreeSet<Address>,
    pub now: u64,
    pub finalized: Vec<(Address, FinalizedBlock)>,
    pub errors: Vec<(Address, ConsensusError)>,
    queue: VecDeque<(Address, Envelope)>,
}

impl Net {
    pub fn new(seeds: &[u8], accounts: Vec<(Address, Coins)>) -> Self {
        let genesis = genesis(seeds, accounts);
        let nodes = seeds
            .iter()
            .map(|s| TestNode::open(*s, &genesis, Arc::new(MemoryStore::new())))
            .collect();
        Self {
            nodes,
            offline: BTreeSet::new(),
            now: 1_000_000,
            finalized: Vec::new(),
            errors: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn start(&mut self) {
        for i in 0..self.nodes.len() {
            let from = self.nodes[i].address();
            let actions = self.nodes[i].engine.start(self.now).unwrap();
            self.route(from, actions);
        }
        self.deliver_all();
    }

    pub fn node(&self, address: &Address) -> &TestNode {
        self.nodes.iter().find(|n| &n.address() == address).unwrap()
    }

    pub fn route(&mut self, from: Address, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(m) => self.queue.push_back((from, Envelope::Broadcast(m))),
                Action::Send { to, message } => {
                    self.queue.push_back((from, Envelope::Send(to, message)))
                }
                Action::Finalized(f) => self.finalized.push((from, f)),
            }
        }
    }

    fn deliver(&mut self, index: usize, from: Address, message: ConsensusMessage) {
        let to = self.nodes[index].address();
        if self.offline.contains(&to) || self.offline.contains(&from) {
            return;
        }
        match self.nodes[index].engine.handle_message(from, message, self.now) {
            Ok(actions) => self.route(to, actions),
            Err(e) => self.errors.push((to, e)),
        }
    }

    pub fn deliver_all(&mut self) {
        let mut steps = 0;
        while let Some((from, envelope)) = self.queue.pop_front() {
            steps += 1;
            assert!(steps < 200_000, "message storm");
            match envelope {
                Envelope::Broadcast(m) => {
                    for i in 0..self.nodes.len() {
                        if self.nodes[i].address() != from {
                            self.deliver(i, from, m.clone());
                        }
                    }
                }
                Envelope::Send(to, m) => {
                    if let Some(i) = self.nodes.iter().position(|n| n.address() == to) {
                        self.deliver(i, from, m);
                    }
                }
            }
        }
    }

    /// Jump the clock to the earliest online deadline and fire it.
    pub fn step(&mut self) {
        let next = self
            .nodes
            .iter()
            .filter(|n| !self.offline.contains(&n.address()))
            .filter_map(|n| n.engine.next_deadline())
            .min();
        let Some(next) = next else {
            return;
        };
        self.now = self.now.max(next);
        for i in 0..self.nodes.len() {
            let addr = self.nodes[i].address();
            if self.offline.contains(&addr) {
                continue;
            }
            if self.nodes[i].engine.next_deadline().is_some_and(|d| d <= self.now) {
                match self.nodes[i].engine.tick(self.now) {
                    Ok(actions) => self.route(addr, actions),
                    Err(e) => self.errors.push((addr, e)),
                }
            }
        }
        self.deliver_all();
    }

    /// Step until every online node has committed `height`, or panic.
    pub fn run_to_height(&mut self, height: u64, max_steps: usize) {
        for _ in 0..max_steps {
            let done = self
                .nodes
                .iter()
                .filter(|n| !self.offline.contains(&n.address()))
                .all(|n| n.height() >= height);
            if done {
                return;
            }
            self.step();
        }
        panic!(
            "height {} not reached, heights {:?}",
            height,
            self.nodes.iter().map(|n| n.height()).collect::<Vec<_>>()
        );
    }
}
