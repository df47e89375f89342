//! Mempool admission gate.
//!
//! Raw transactions are decoded, deduplicated and screened by the ledger
//! before they are queued. Queued transactions are ranked by effective gas
//! price, ties going to the earlier arrival. After every committed block
//! the pool drops included transactions and re-screens the rest against
//! the new committed state.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use num_bigint::BigInt;
use parking_lot::Mutex;
use scpt_common::{Address, Hash};
use thiserror::Error;
use tracing::debug;

use crate::error::{ErrorCode, LedgerError};
use crate::gas::effective_gas_price;
use crate::ledger::Ledger;
use crate::tx::Tx;

pub const DEFAULT_MEMPOOL_CAPACITY: usize = 30_000;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    Duplicate(Hash),

    #[error("a transaction from {address} with sequence {sequence} is already in mempool")]
    DuplicateSequence { address: Address, sequence: u64 },

    #[error("mempool full ({0} transactions)")]
    Full(usize),

    #[error(transparent)]
    Rejected(#[from] LedgerError),
}

impl MempoolError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            MempoolError::Duplicate(_) | MempoolError::DuplicateSequence { .. } => {
                ErrorCode::DuplicateTx
            }
            MempoolError::Full(_) => ErrorCode::MempoolFull,
            MempoolError::Rejected(e) => e.code(),
        }
    }
}

#[derive(Clone)]
struct Entry {
    tx_id: Hash,
    price: BigInt,
    arrival: u64,
    signer: Option<(Address, u64)>,
    tx: Tx,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.arrival == other.arrival
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.price.cmp(&other.price) {
            Ordering::Equal => other.arrival.cmp(&self.arrival),
            ord => ord,
        }
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    by_id: HashMap<Hash, u64>,
    by_signer: HashMap<(Address, u64), Hash>,
    next_arrival: u64,
}

impl Inner {
    fn push(&mut self, mut entry: Entry) {
        entry.arrival = self.next_arrival;
        self.next_arrival += 1;
        self.by_id.insert(entry.tx_id, entry.arrival);
        if let Some(key) = entry.signer {
            self.by_signer.insert(key, entry.tx_id);
        }
        self.heap.push(entry);
    }
}

pub struct Mempool {
    ledger: Arc<Ledger>,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Mempool {
    pub fn new(ledger: Arc<Ledger>, capacity: usize) -> Self {
        Self {
            ledger,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, tx_id: &Hash) -> bool {
        self.inner.lock().by_id.contains_key(tx_id)
    }

    /// Pending transaction by id.
    pub fn get(&self, tx_id: &Hash) -> Option<Tx> {
        let inner = self.inner.lock();
        inner
            .by_id
            .contains_key(tx_id)
            .then(|| inner.heap.iter().find(|e| &e.tx_id == tx_id).map(|e| e.tx.clone()))
            .flatten()
    }

    /// Admit a raw transaction. Returns its id.
    pub fn insert(&self, raw: &[u8]) -> Result<Hash, MempoolError> {
        let tx = Tx::from_bytes(raw)?;
        let tx_id = tx.tx_id(self.ledger.chain_id())?;
        let signer = tx.primary_signer();

        let mut inner = self.inner.lock();
        if inner.by_id.contains_key(&tx_id) {
            return Err(MempoolError::Duplicate(tx_id));
        }
        if let Some((address, sequence)) = signer {
            if inner.by_signer.contains_key(&(address, sequence)) {
                return Err(MempoolError::DuplicateSequence { address, sequence });
            }
        }
        if inner.heap.len() >= self.capacity {
            return Err(MempoolError::Full(self.capacity));
        }
        if let Err(e) = self.ledger.screen(&tx) {
            debug!(tx = %tx_id.short(), code = e.code().as_u32(), error = %e, "tx rejected");
            return Err(e.into());
        }

        let price = effective_gas_price(&tx);
        debug!(tx = %tx_id.short(), kind = tx.kind().as_str(), %price, "tx admitted");
        inner.push(Entry {
            tx_id,
            price,
            arrival: 0,
            signer,
            tx,
        });
        Ok(tx_id)
    }

    /// Up to `max` transactions, best price first. Transactions from one
    /// signer keep ascending sequence order among the slots they occupy.
    pub fn reap(&self, max: usize) -> Vec<Tx> {
        let inner = self.inner.lock();
        let mut ranked: Vec<Entry> = inner.heap.clone().into_sorted_vec();
        ranked.reverse();

        let mut slots: HashMap<Address, Vec<usize>> = HashMap::new();
        for (i, e) in ranked.iter().enumerate() {
            if let Some((addr, _)) = e.signer {
                slots.entry(addr).or_default().push(i);
            }
        }
        let mut ordered: Vec<Option<Entry>> = ranked.iter().cloned().map(Some).collect();
        for positions in slots.values().filter(|p| p.len() > 1) {
            let mut entries: Vec<Entry> = positions.iter().map(|&i| ranked[i].clone()).collect();
            entries.sort_by_key(|e| e.signer.map(|(_, seq)| seq));
            for (&pos, entry) in positions.iter().zip(entries) {
                ordered[pos] = Some(entry);
            }
        }
        ordered.into_iter().flatten().take(max).map(|e| e.tx).collect()
    }

    /// Drop committed transactions, restart screening from the committed
    /// state and re-screen the survivors in arrival order. Survivors that
    /// no longer pass are evicted. Returns the number evicted.
    pub fn update(&self, committed: &[Hash]) -> usize {
        let mut inner = self.inner.lock();
        let mut survivors: Vec<Entry> = std::mem::take(&mut inner.heap)
            .into_vec()
            .into_iter()
            .filter(|e| !committed.contains(&e.tx_id))
            .collect();
        survivors.sort_by_key(|e| e.arrival);
        inner.by_id.clear();
        inner.by_signer.clear();

        self.ledger.reset_screening();
        let mut evicted = 0;
        for entry in survivors {
            match self.ledger.screen(&entry.tx) {
                Ok(_) => inner.push(entry),
                Err(e) => {
                    evicted += 1;
                    debug!(tx = %entry.tx_id.short(), error = %e, "evicted from mempool");
                }
            }
        }
        debug!(
            removed = committed.len(),
            evicted,
            remaining = inner.heap.len(),
            "mempool updated"
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{Genesis, GenesisAccount};
    use crate::tx::{SendTx, TxInput, TxOutput};
    use crate::vm::KvVm;
    use scpt_common::{tokens, Coins, Keypair};
    use scpt_storage::{KvStore, MemoryStore};

    const CHAIN: &str = "mempool";

    fn setup(keys: &[&Keypair]) -> Arc<Ledger> {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(CHAIN, store, Arc::new(KvVm)).unwrap();
        let genesis = Genesis {
            chain_id: CHAIN.into(),
            accounts: keys
                .iter()
                .map(|k| GenesisAccount {
                    address: k.address(),
                    coins: Coins::spay(tokens(100)),
                })
                .collect(),
            stakes: vec![],
        };
        ledger.init_genesis(&genesis).unwrap();
        Arc::new(ledger)
    }

    fn send(k: &Keypair, seq: u64, fee: u64) -> Vec<u8> {
        let fee = Coins::spay(fee);
        let amount = Coins::spay(1_000u64);
        let mut tx = Tx::Send(SendTx {
            fee: fee.clone(),
            inputs: vec![TxInput::new(k.address(), amount.plus(&fee), seq)],
            outputs: vec![TxOutput::new(Address::from_bytes([0xee; 20]), amount)],
        });
        tx.sign(CHAIN, &[k]).unwrap();
        tx.to_bytes().unwrap()
    }

    #[test]
    fn rejects_duplicates_and_bad_txs() {
        let a = Keypair::from_seed(1);
        let pool = Mempool::new(setup(&[&a]), 10);
        let raw = send(&a, 1, 1_000_000_000_000);
        pool.insert(&raw).unwrap();
        assert!(matches!(pool.insert(&raw), Err(MempoolError::Duplicate(_))));
        let same_seq = send(&a, 1, 2_000_000_000_000);
        assert!(matches!(
            pool.insert(&same_seq),
            Err(MempoolError::DuplicateSequence { .. })
        ));
        let low_fee = send(&a, 2, 1);
        let err = pool.insert(&low_fee).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFee);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn reap_orders_by_price_then_arrival() {
        let a = Keypair::from_seed(1);
        let b = Keypair::from_seed(2);
        let c = Keypair::from_seed(3);
        let pool = Mempool::new(setup(&[&a, &b, &c]), 10);
        let low = pool.insert(&send(&a, 1, 1_000_000_000_000)).unwrap();
        let high = pool.insert(&send(&b, 1, 5_000_000_000_000)).unwrap();
        let low2 = pool.insert(&send(&c, 1, 1_000_000_000_000)).unwrap();

        let ids: Vec<Hash> = pool
            .reap(10)
            .iter()
            .map(|tx| tx.tx_id(CHAIN).unwrap())
            .collect();
        assert_eq!(ids, vec![high, low, low2]);
        assert_eq!(pool.reap(1).len(), 1);
    }

    #[test]
    fn same_signer_keeps_sequence_order() {
        let a = Keypair::from_seed(1);
        let pool = Mempool::new(setup(&[&a]), 10);
        pool.insert(&send(&a, 1, 1_000_000_000_000)).unwrap();
        pool.insert(&send(&a, 2, 9_000_000_000_000)).unwrap();
        let seqs: Vec<u64> = pool
            .reap(10)
            .iter()
            .filter_map(|tx| tx.primary_signer().map(|(_, s)| s))
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn capacity_is_enforced() {
        let a = Keypair::from_seed(1);
        let pool = Mempool::new(setup(&[&a]), 1);
        pool.insert(&send(&a, 1, 1_000_000_000_000)).unwrap();
        assert!(matches!(
            pool.insert(&send(&a, 2, 1_000_000_000_000)),
            Err(MempoolError::Full(1))
        ));
    }

    #[test]
    fn update_drops_committed_and_rescreens() {
        let a = Keypair::from_seed(1);
        let ledger = setup(&[&a]);
        let pool = Mempool::new(ledger.clone(), 10);
        let first = pool.insert(&send(&a, 1, 1_000_000_000_000)).unwrap();
        pool.insert(&send(&a, 2, 1_000_000_000_000)).unwrap();

        let head = ledger.head().unwrap();
        let proposed = ledger
            .propose_block(&head, pool.reap(1), Address::ZERO, 1)
            .unwrap();
        let view = ledger.validate_block(&proposed.block).unwrap();
        ledger.commit_block(&proposed.block, view).unwrap();

        assert_eq!(pool.update(&[first]), 0);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&first));
        // the survivor still screens: sequence 3 is next
        pool.insert(&send(&a, 3, 1_000_000_000_000)).unwrap();
    }

    #[test]
    fn update_evicts_stale_survivors() {
        let a = Keypair::from_seed(1);
        let ledger = setup(&[&a]);
        let pool = Mempool::new(ledger.clone(), 10);
        let raw = send(&a, 1, 1_000_000_000_000);
        pool.insert(&raw).unwrap();

        // the same tx lands in a block without going through update's id list
        let tx = Tx::from_bytes(&raw).unwrap();
        let head = ledger.head().unwrap();
        let proposed = ledger.propose_block(&head, vec![tx], Address::ZERO, 1).unwrap();
        ledger.commit_block(&proposed.block, proposed.view).unwrap();

        assert_eq!(pool.update(&[]), 1);
        assert!(pool.is_empty());
    }
}
