//! Validator sets and committees derived from a live ledger.

use std::sync::Arc;

use scpt_common::{tokens, Address, BlsKeypair, Coins, Keypair};
use scpt_ledger::{
    BlockHeader, DepositStakeTx, Genesis, GenesisAccount, GenesisStake, HolderSignature, KvVm,
    Ledger, StakePurpose, Tx, TxInput, TxOutput,
};
use scpt_storage::{KvStore, MemoryStore};
use scpt_validator::{EpochConfig, ValidatorManager};

const CHAIN: &str = "validator-tests";

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

fn fee() -> Coins {
    Coins::spay(1_000_000_000_000u64)
}

struct Chain {
    ledger: Arc<Ledger>,
    head: BlockHeader,
}

impl Chain {
    fn new(accounts: Vec<(Address, Coins)>, stakes: Vec<GenesisStake>) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(CHAIN, store, Arc::new(KvVm)).unwrap());
        let genesis = Genesis {
            chain_id: CHAIN.into(),
            accounts: accounts
                .into_iter()
                .map(|(address, coins)| GenesisAccount { address, coins })
                .collect(),
            stakes,
        };
        let head = ledger.init_genesis(&genesis).unwrap().header;
        Self { ledger, head }
    }

    fn produce(&mut self, txs: Vec<Tx>) {
        let proposed = self
            .ledger
            .propose_block(&self.head, txs, Address::ZERO, 0)
            .unwrap();
        assert_eq!(proposed.skipped, 0);
        self.ledger
            .commit_block(&proposed.block, proposed.view)
            .unwrap();
        self.head = proposed.block.header;
    }

    fn advance_to(&mut self, height: u64) {
        while self.head.height < height {
            self.produce(Vec::new());
        }
    }
}

fn validator_stake(holder: Address, amount: u64) -> GenesisStake {
    GenesisStake {
        source: addr(0xee),
        holder,
        amount: tokens(amount),
        purpose: StakePurpose::Validator,
        bls_pubkey: None,
    }
}

#[test]
fn stake_below_threshold_is_excluded_and_deposits_wait_for_the_next_epoch() {
    let funder = Keypair::from_seed(7);
    let mut chain = Chain::new(
        vec![(funder.address(), Coins::new(tokens(500_000), tokens(10)))],
        vec![validator_stake(addr(1), 200_000), validator_stake(addr(2), 50_000)],
    );
    let mgr = ValidatorManager::new(chain.ledger.clone(), EpochConfig::new(10, 31).unwrap());

    let first = mgr.validator_set_for_height(1).unwrap();
    assert!(first.contains(&addr(1)));
    assert!(!first.contains(&addr(2)));

    chain.advance_to(4);
    let mut deposit = Tx::DepositStake(DepositStakeTx {
        fee: fee(),
        source: TxInput::new(funder.address(), Coins::scpt(tokens(100_000)), 1),
        holder: TxOutput::new(addr(2), Coins::zero()),
        purpose: StakePurpose::Validator,
        bls_pubkey: None,
        bls_pop: None,
        holder_sig: None,
    });
    deposit.sign(CHAIN, &[&funder]).unwrap();
    chain.produce(vec![deposit]);
    chain.advance_to(12);

    // posted at height 5, but epoch 0 was fixed from genesis state
    let same_epoch = mgr.validator_set_for_height(10).unwrap();
    assert!(!same_epoch.contains(&addr(2)));
    assert_eq!(same_epoch.total_power(), 200_000 * 10u128.pow(18));

    let next = mgr.validator_set_for_height(11).unwrap();
    assert_eq!(next.epoch(), 1);
    assert_eq!(next.power_of(&addr(2)), 150_000 * 10u128.pow(18));
    assert!(next.has_supermajority(next.power_of(&addr(1)) + 1));
    assert!(!next.has_supermajority(next.power_of(&addr(1))));
}

#[test]
fn committee_reads_guardians_at_the_checkpoint() {
    let g = Keypair::from_seed(2);
    let source = Keypair::from_seed(3);
    let bls = BlsKeypair::from_seed(b"guardian-2").unwrap();
    let mut chain = Chain::new(
        vec![(source.address(), Coins::new(tokens(10_000), tokens(10)))],
        vec![validator_stake(addr(1), 200_000)],
    );
    let mgr = ValidatorManager::new(chain.ledger.clone(), EpochConfig::default());

    chain.advance_to(1);
    assert!(mgr.committee_for_height(50).unwrap().is_empty());

    let mut deposit = Tx::DepositStake(DepositStakeTx {
        fee: fee(),
        source: TxInput::new(source.address(), Coins::scpt(tokens(2_000)), 1),
        holder: TxOutput::new(g.address(), Coins::zero()),
        purpose: StakePurpose::Guardian,
        bls_pubkey: Some(bls.public_key()),
        bls_pop: Some(bls.proof_of_possession()),
        holder_sig: Some(HolderSignature::sign(&g, &source.address())),
    });
    deposit.sign(CHAIN, &[&source]).unwrap();
    chain.produce(vec![deposit]);
    chain.advance_to(101);

    // checkpoint 1 stays cached and unchanged
    assert!(mgr.committee_for_height(100).unwrap().is_empty());
    let committee = mgr.committee_for_height(150).unwrap();
    assert_eq!(committee.checkpoint_height(), 101);
    let member = committee.member(&g.address()).unwrap();
    assert_eq!(member.bls_pubkey, bls.public_key());
    assert_eq!(member.power, 2_000 * 10u128.pow(18));
}
