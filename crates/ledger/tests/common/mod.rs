//! Shared harness for ledger integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use scpt_common::{Address, Coins, Keypair};
use scpt_ledger::{
    Block, BlockHeader, Genesis, GenesisAccount, GenesisStake, KvVm, Ledger, ProposedBlock,
    SendTx, Tx, TxInput, TxOutput,
};
use scpt_storage::{KvStore, MemoryStore};

pub const CHAIN: &str = "ledger-tests";

pub fn min_fee() -> Coins {
    Coins::spay(1_000_000_000_000u64)
}

/// Ledger over an in-memory store, with a committed genesis.
pub struct TestChain {
    pub ledger: Ledger,
    pub head: BlockHeader,
}

impl TestChain {
    pub fn new(accounts: Vec<(Address, Coins)>, stakes: Vec<GenesisStake>) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(CHAIN, store, Arc::new(KvVm)).unwrap();
        let genesis = Genesis {
            chain_id: CHAIN.into(),
            accounts: accounts
                .into_iter()
                .map(|(address, coins)| GenesisAccount { address, coins })
                .collect(),
            stakes,
        };
        let block = ledger.init_genesis(&genesis).unwrap();
        Self {
            ledger,
            head: block.header,
        }
    }

    /// Propose, re-validate and commit one block. Invalid txs are skipped.
    pub fn produce(&mut self, txs: Vec<Tx>) -> ProposedBlock {
        let proposed = self
            .ledger
            .propose_block(&self.head, txs, Address::ZERO, self.head.height + 1)
            .unwrap();
        let view = self.ledger.validate_block(&proposed.block).unwrap();
        assert_eq!(view, proposed.view);
        self.ledger.commit_block(&proposed.block, view).unwrap();
        self.head = proposed.block.header.clone();
        proposed
    }

    /// Produce a block that must include every tx.
    pub fn produce_all(&mut self, txs: Vec<Tx>) -> Block {
        let n = txs.len();
        let proposed = self.produce(txs);
        assert_eq!(proposed.skipped, 0, "a transaction was skipped");
        assert_eq!(proposed.block.txs.len(), n);
        proposed.block
    }

    /// Produce empty blocks until the committed height is `height`.
    pub fn advance_to(&mut self, height: u64) {
        while self.head.height < height {
            self.produce(Vec::new());
        }
    }

    pub fn height(&self) -> u64 {
        self.head.height
    }

    pub fn balance(&self, addr: &Address) -> Coins {
        self.ledger
            .account(addr)
            .unwrap()
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn sequence(&self, addr: &Address) -> u64 {
        self.ledger
            .account(addr)
            .unwrap()
            .map(|a| a.sequence)
            .unwrap_or_default()
    }
}

pub fn signed(mut tx: Tx, keys: &[&Keypair]) -> Tx {
    tx.sign(CHAIN, keys).unwrap();
    tx
}

pub fn send(from: &Keypair, seq: u64, to: Address, amount: Coins) -> Tx {
    let fee = min_fee();
    signed(
        Tx::Send(SendTx {
            fee: fee.clone(),
            inputs: vec![TxInput::new(from.address(), amount.plus(&fee), seq)],
            outputs: vec![TxOutput::new(to, amount)],
        }),
        &[from],
    )
}
