//! # Ledger Facade
//!
//! Owns the committed state and the screening state, and is the only
//! place blocks are built, re-executed and committed.
//!
//! ```text
//!              ┌──────────────── RwLock ────────────────┐
//!   readers ──►│ committed: StoreView @ h, head header   │◄── commit_block (writer)
//!              └─────────────────────────────────────────┘
//!                     │ clone                │ clone
//!                     ▼                      ▼
//!          screening view (Mutex)     block view @ h+1
//!          screen_tx / mempool        propose_block / validate_block
//! ```
//!
//! Every block runs the same pipeline against a clone of the committed
//! view:
//!
//! 1. return withdrawn stakes due at this height
//! 2. issue checkpoint rewards
//! 3. drop expired split contracts
//! 4. execute transactions in block order
//!
//! The committed view only changes in [`Ledger::commit_block`], which
//! writes the block's touched keys as one batch at the block height.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use scpt_common::{Address, Hash};
use scpt_storage::KvStore;
use tracing::{debug, info};

use crate::account::Account;
use crate::block::{Block, BlockHeader};
use crate::error::{LedgerError, LedgerResult};
use crate::execution::{process_stake_returns, run_contract_call, Executor, TxOutcome};
use crate::genesis::{Genesis, GenesisError};
use crate::reward::{issue_stake_rewards, RewardRates, CURRENT_REWARD_RATES};
use crate::stake::{CandidatePool, StakePurpose};
use crate::state::{
    account_key, pool_key, srd_key, SplitContract, StakeRewardDistributionRule, StakeSnapshot,
    StoreView, LEDGER_PREFIX,
};
use crate::tx::{SmartContractTx, Tx};
use crate::vm::{VirtualMachine, VmOutcome};

/// Versioned key holding the header of the block committed at each height.
/// Lives outside the state-root prefix.
const HEAD_KEY: &[u8] = b"lb/head";

struct Committed {
    view: StoreView,
    head: BlockHeader,
}

/// A block built by [`Ledger::propose_block`] with the state it produces.
#[derive(Debug, Clone)]
pub struct ProposedBlock {
    pub block: Block,
    pub view: StoreView,
    pub outcomes: Vec<TxOutcome>,
    /// Transactions left out because they failed validation.
    pub skipped: usize,
}

pub struct Ledger {
    chain_id: String,
    store: Arc<dyn KvStore>,
    vm: Arc<dyn VirtualMachine>,
    rates: RewardRates,
    committed: RwLock<Option<Committed>>,
    screening: Mutex<StoreView>,
}

impl Ledger {
    /// Open the ledger over `store`, resuming from the latest committed
    /// height if there is one. A fresh store needs [`Ledger::init_genesis`].
    pub fn new(
        chain_id: impl Into<String>,
        store: Arc<dyn KvStore>,
        vm: Arc<dyn VirtualMachine>,
    ) -> LedgerResult<Self> {
        let chain_id = chain_id.into();
        let committed = match store.latest_height() {
            None => None,
            Some(height) => {
                let view = load_view(store.as_ref(), height)?;
                let head = load_head(store.as_ref(), height)?;
                if head.chain_id != chain_id {
                    return Err(LedgerError::InvalidBlock(format!(
                        "store holds chain {}, expected {}",
                        head.chain_id, chain_id
                    )));
                }
                info!(height, root = %view.state_root().short(), "resumed ledger state");
                Some(Committed { view, head })
            }
        };
        let screening = committed
            .as_ref()
            .map(|c| c.view.clone())
            .unwrap_or_default();
        Ok(Self {
            chain_id,
            store,
            vm,
            rates: CURRENT_REWARD_RATES,
            committed: RwLock::new(committed),
            screening: Mutex::new(screening),
        })
    }

    /// Override the staking reward rates.
    pub fn with_reward_rates(mut self, rates: RewardRates) -> Self {
        self.rates = rates;
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    // ════════════════════════════════════════════════════════════════════════
    // GENESIS
    // ════════════════════════════════════════════════════════════════════════

    /// Commit the genesis state at height 0, or check that the already
    /// committed genesis matches `genesis`. Returns the genesis block.
    pub fn init_genesis(&self, genesis: &Genesis) -> Result<Block, GenesisError> {
        if genesis.chain_id != self.chain_id {
            return Err(GenesisError::Invalid(format!(
                "genesis is for chain {}, ledger runs {}",
                genesis.chain_id, self.chain_id
            )));
        }
        let mut view = genesis.build_view()?;
        let block = Block::genesis(&self.chain_id, view.state_root());

        if self.store.latest_height().is_some() {
            let stored = load_head(self.store.as_ref(), 0)?;
            if stored != block.header {
                return Err(GenesisError::Invalid(
                    "genesis does not match the committed chain".into(),
                ));
            }
            return Ok(block);
        }

        let mut batch = view.write_batch();
        batch.put(HEAD_KEY, encode_header(&block.header)?);
        self.store.commit(0, batch).map_err(LedgerError::from)?;
        view.mark_clean();
        info!(
            chain_id = %self.chain_id,
            accounts = genesis.accounts.len(),
            stakes = genesis.stakes.len(),
            root = %block.header.state_root.short(),
            "genesis committed"
        );
        *self.screening.lock() = view.clone();
        *self.committed.write() = Some(Committed {
            view,
            head: block.header.clone(),
        });
        Ok(block)
    }

    // ════════════════════════════════════════════════════════════════════════
    // SCREENING
    // ════════════════════════════════════════════════════════════════════════

    /// Decode and screen a raw transaction against the screening view.
    /// Accepted transactions are applied to the screening view only, so a
    /// follow-up transaction from the same account screens against the
    /// updated sequence and balance. The committed view is never touched.
    pub fn screen_tx(&self, raw: &[u8]) -> LedgerResult<(Tx, Hash)> {
        let tx = Tx::from_bytes(raw)?;
        let outcome = self.screen(&tx)?;
        Ok((tx, outcome.tx_id))
    }

    /// [`Ledger::screen_tx`] for an already decoded transaction.
    pub fn screen(&self, tx: &Tx) -> LedgerResult<TxOutcome> {
        let executor = Executor::new(&self.chain_id, self.vm.as_ref());
        let mut screening = self.screening.lock();
        executor.execute(tx, &mut screening)
    }

    /// Validate-only check against the committed view.
    pub fn check_tx(&self, tx: &Tx) -> LedgerResult<()> {
        let view = self.committed_view()?;
        Executor::new(&self.chain_id, self.vm.as_ref()).sanity_check(tx, &view)
    }

    /// Restart screening from the committed view.
    pub fn reset_screening(&self) {
        let fresh = self
            .committed
            .read()
            .as_ref()
            .map(|c| c.view.clone())
            .unwrap_or_default();
        *self.screening.lock() = fresh;
    }

    // ════════════════════════════════════════════════════════════════════════
    // BLOCKS
    // ════════════════════════════════════════════════════════════════════════

    /// Build the next block on top of `parent`, which must be the committed
    /// head. Transactions that fail validation are skipped.
    pub fn propose_block(
        &self,
        parent: &BlockHeader,
        txs: Vec<Tx>,
        proposer: Address,
        timestamp: u64,
    ) -> LedgerResult<ProposedBlock> {
        let mut view = self.child_view(parent)?;
        let height = view.block_height();
        let executor = Executor::new(&self.chain_id, self.vm.as_ref());
        self.begin_block(&mut view)?;

        let mut included = Vec::with_capacity(txs.len());
        let mut outcomes = Vec::with_capacity(txs.len());
        let mut skipped = 0;
        for tx in txs {
            // a non-fault error comes from the validate phase, so `view` is untouched
            match executor.execute(&tx, &mut view) {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    included.push(tx);
                }
                Err(e) if e.is_fault() => return Err(e),
                Err(e) => {
                    skipped += 1;
                    debug!(height, kind = tx.kind().as_str(), error = %e, "skipping transaction");
                }
            }
        }
        view.set_height(height);
        let block = Block::new(
            &self.chain_id,
            height,
            parent.hash(),
            proposer,
            view.state_root(),
            timestamp,
            included,
        );
        debug!(
            height,
            txs = block.txs.len(),
            skipped,
            root = %block.header.state_root.short(),
            "block proposed"
        );
        Ok(ProposedBlock {
            block,
            view,
            outcomes,
            skipped,
        })
    }

    /// Re-execute `block` on top of the committed head. Every transaction
    /// must apply and the resulting state root must match the header.
    pub fn validate_block(&self, block: &Block) -> LedgerResult<StoreView> {
        block.check_basic(&self.chain_id)?;
        let head = self.head()?;
        if block.height() != head.height + 1 {
            return Err(LedgerError::InvalidBlock(format!(
                "height {} does not extend committed height {}",
                block.height(),
                head.height
            )));
        }
        if block.parent() != head.hash() {
            return Err(LedgerError::InvalidBlock(format!(
                "parent {} is not the committed head",
                block.parent().short()
            )));
        }

        let mut view = self.child_view(&head)?;
        let executor = Executor::new(&self.chain_id, self.vm.as_ref());
        self.begin_block(&mut view)?;
        for (index, tx) in block.txs.iter().enumerate() {
            executor
                .execute(tx, &mut view)
                .map_err(|e| LedgerError::BlockTx {
                    index,
                    source: Box::new(e),
                })?;
        }
        view.set_height(block.height());

        let computed = view.state_root();
        if computed != block.header.state_root {
            return Err(LedgerError::StateRootMismatch {
                expected: block.header.state_root,
                computed,
            });
        }
        Ok(view)
    }

    /// Persist `view` (produced by proposing or validating `block`) as the
    /// state at the block's height and make it the committed view.
    pub fn commit_block(&self, block: &Block, mut view: StoreView) -> LedgerResult<()> {
        let mut committed = self.committed.write();
        let current = committed
            .as_ref()
            .ok_or_else(|| LedgerError::Internal("ledger has no genesis".into()))?;
        if block.height() != current.head.height + 1 || view.height() != block.height() {
            return Err(LedgerError::InvalidBlock(format!(
                "cannot commit block {} (view {}) on top of {}",
                block.height(),
                view.height(),
                current.head.height
            )));
        }
        let root = view.state_root();
        if root != block.header.state_root {
            return Err(LedgerError::StateRootMismatch {
                expected: block.header.state_root,
                computed: root,
            });
        }

        let mut batch = view.write_batch();
        let keys = batch.len();
        batch.put(HEAD_KEY, encode_header(&block.header)?);
        self.store.commit(block.height(), batch)?;
        view.mark_clean();
        info!(
            height = block.height(),
            txs = block.txs.len(),
            keys,
            root = %root.short(),
            "block committed"
        );
        *committed = Some(Committed {
            view,
            head: block.header.clone(),
        });
        Ok(())
    }

    fn begin_block(&self, view: &mut StoreView) -> LedgerResult<()> {
        let height = view.block_height();
        process_stake_returns(view)?;
        issue_stake_rewards(view, &self.rates)?;
        let expired = view.delete_expired_split_contracts(height)?;
        if expired > 0 {
            debug!(height, expired, "removed expired split contracts");
        }
        Ok(())
    }

    fn child_view(&self, parent: &BlockHeader) -> LedgerResult<StoreView> {
        let committed = self.committed.read();
        let current = committed
            .as_ref()
            .ok_or_else(|| LedgerError::Internal("ledger has no genesis".into()))?;
        if parent != &current.head {
            return Err(LedgerError::InvalidBlock(format!(
                "parent at height {} is not the committed head at {}",
                parent.height, current.head.height
            )));
        }
        let mut view = current.view.clone();
        view.mark_clean();
        Ok(view)
    }

    // ════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ════════════════════════════════════════════════════════════════════════

    pub fn head(&self) -> LedgerResult<BlockHeader> {
        self.committed
            .read()
            .as_ref()
            .map(|c| c.head.clone())
            .ok_or_else(|| LedgerError::Internal("ledger has no genesis".into()))
    }

    #[must_use]
    pub fn committed_height(&self) -> Option<u64> {
        self.committed.read().as_ref().map(|c| c.head.height)
    }

    pub fn committed_view(&self) -> LedgerResult<StoreView> {
        self.committed
            .read()
            .as_ref()
            .map(|c| c.view.clone())
            .ok_or_else(|| LedgerError::Internal("ledger has no genesis".into()))
    }

    /// Full state as committed at `height`.
    pub fn view_at(&self, height: u64) -> LedgerResult<StoreView> {
        load_view(self.store.as_ref(), height)
    }

    /// Header of the block committed at `height`.
    pub fn header_at(&self, height: u64) -> LedgerResult<BlockHeader> {
        load_head(self.store.as_ref(), height)
    }

    pub fn account(&self, addr: &Address) -> LedgerResult<Option<Account>> {
        match self.committed.read().as_ref() {
            Some(c) => c.view.get_account(addr),
            None => Ok(None),
        }
    }

    pub fn account_at(&self, addr: &Address, height: u64) -> LedgerResult<Option<Account>> {
        self.get_at(&account_key(addr), height)
    }

    /// The three candidate pools as committed at `height`.
    pub fn stake_snapshot_at(&self, height: u64) -> LedgerResult<StakeSnapshot> {
        let pool = |purpose: StakePurpose| -> LedgerResult<CandidatePool> {
            Ok(self
                .get_at(&pool_key(purpose), height)?
                .unwrap_or_else(|| CandidatePool::new(purpose)))
        };
        Ok(StakeSnapshot {
            height,
            validators: pool(StakePurpose::Validator)?,
            guardians: pool(StakePurpose::Guardian)?,
            elite_edge_nodes: pool(StakePurpose::EliteEdgeNode)?,
        })
    }

    pub fn split_rule(&self, resource_id: &str) -> LedgerResult<Option<SplitContract>> {
        match self.committed.read().as_ref() {
            Some(c) => c.view.get_split_contract(resource_id),
            None => Ok(None),
        }
    }

    pub fn srd_rule_at(
        &self,
        holder: &Address,
        height: u64,
    ) -> LedgerResult<Option<StakeRewardDistributionRule>> {
        self.get_at(&srd_key(holder), height)
    }

    /// Run a contract call against a scratch copy of the committed view.
    /// Nothing is persisted and no signature is required.
    pub fn call_smart_contract(&self, tx: &SmartContractTx) -> LedgerResult<VmOutcome> {
        let mut view = self.committed_view()?;
        if view.get_account(&tx.from.address)?.is_none() {
            view.set_account(&Account::new(tx.from.address))?;
        }
        let (outcome, _) = run_contract_call(self.vm.as_ref(), tx, &mut view)?;
        if let Some(reason) = &outcome.error {
            debug!(contract = %tx.to.address, reason = %reason, "dry-run call reverted");
        }
        Ok(outcome)
    }

    fn get_at<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
        height: u64,
    ) -> LedgerResult<Option<T>> {
        match self.store.get_at(key, height)? {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LedgerError::Internal(format!("corrupt stored value: {}", e))),
        }
    }
}

fn encode_header(header: &BlockHeader) -> LedgerResult<Vec<u8>> {
    bincode::serialize(header).map_err(|e| LedgerError::Internal(e.to_string()))
}

fn load_view(store: &dyn KvStore, height: u64) -> LedgerResult<StoreView> {
    let entries = store.scan_at(LEDGER_PREFIX, height)?;
    Ok(StoreView::from_entries(height, entries))
}

fn load_head(store: &dyn KvStore, height: u64) -> LedgerResult<BlockHeader> {
    let bytes = store
        .get_at(HEAD_KEY, height)?
        .ok_or_else(|| LedgerError::Internal(format!("no block header at height {}", height)))?;
    bincode::deserialize(&bytes).map_err(|e| LedgerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisAccount;
    use crate::tx::{SendTx, TxInput, TxOutput};
    use crate::vm::KvVm;
    use scpt_common::{tokens, Coins, Keypair};
    use scpt_storage::MemoryStore;

    const CHAIN: &str = "unit";

    fn ledger_with(k: &Keypair) -> (Ledger, Block) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(CHAIN, store, Arc::new(KvVm)).unwrap();
        let genesis = Genesis {
            chain_id: CHAIN.into(),
            accounts: vec![GenesisAccount {
                address: k.address(),
                coins: Coins::new(tokens(10), tokens(10)),
            }],
            stakes: vec![],
        };
        let block = ledger.init_genesis(&genesis).unwrap();
        (ledger, block)
    }

    fn send(k: &Keypair, seq: u64, to: Address) -> Tx {
        let fee = Coins::spay(1_000_000_000_000u64);
        let amount = Coins::spay(tokens(1));
        let mut tx = Tx::Send(SendTx {
            fee: fee.clone(),
            inputs: vec![TxInput::new(k.address(), amount.plus(&fee), seq)],
            outputs: vec![TxOutput::new(to, amount)],
        });
        tx.sign(CHAIN, &[k]).unwrap();
        tx
    }

    #[test]
    fn screening_does_not_touch_committed_view() {
        let k = Keypair::from_seed(1);
        let (ledger, _) = ledger_with(&k);
        let raw = send(&k, 1, Address::from_bytes([9; 20])).to_bytes().unwrap();
        ledger.screen_tx(&raw).unwrap();
        assert_eq!(ledger.account(&k.address()).unwrap().unwrap().sequence, 0);
        // replay against the screening view fails
        assert!(ledger.screen_tx(&raw).is_err());
        ledger.reset_screening();
        assert!(ledger.screen_tx(&raw).is_ok());
    }

    #[test]
    fn propose_validate_commit() {
        let k = Keypair::from_seed(1);
        let (ledger, genesis) = ledger_with(&k);
        let to = Address::from_bytes([9; 20]);
        let proposed = ledger
            .propose_block(
                &genesis.header,
                vec![send(&k, 1, to), send(&k, 5, to)],
                Address::ZERO,
                1,
            )
            .unwrap();
        assert_eq!(proposed.block.txs.len(), 1);
        assert_eq!(proposed.skipped, 1);

        let view = ledger.validate_block(&proposed.block).unwrap();
        assert_eq!(view.state_root(), proposed.view.state_root());
        ledger.commit_block(&proposed.block, view).unwrap();

        assert_eq!(ledger.committed_height(), Some(1));
        let b = ledger.account(&to).unwrap().unwrap();
        assert_eq!(b.balance.spay, tokens(1));
        // historical reads
        assert!(ledger.account_at(&to, 0).unwrap().is_none());
        assert!(ledger.account_at(&to, 1).unwrap().is_some());
    }

    #[test]
    fn wrong_state_root_rejected() {
        let k = Keypair::from_seed(1);
        let (ledger, genesis) = ledger_with(&k);
        let mut proposed = ledger
            .propose_block(&genesis.header, vec![send(&k, 1, Address::from_bytes([9; 20]))], Address::ZERO, 1)
            .unwrap();
        proposed.block.header.state_root = Hash::ZERO;
        assert!(matches!(
            ledger.validate_block(&proposed.block),
            Err(LedgerError::StateRootMismatch { .. })
        ));
    }

    #[test]
    fn invalid_tx_in_block_reports_index() {
        let k = Keypair::from_seed(1);
        let (ledger, genesis) = ledger_with(&k);
        let to = Address::from_bytes([9; 20]);
        let good = ledger
            .propose_block(&genesis.header, vec![send(&k, 1, to)], Address::ZERO, 1)
            .unwrap();
        let bad = Block::new(
            CHAIN,
            1,
            good.block.parent(),
            Address::ZERO,
            good.block.header.state_root,
            1,
            vec![send(&k, 1, to), send(&k, 1, to)],
        );
        match ledger.validate_block(&bad) {
            Err(LedgerError::BlockTx { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn reopen_resumes_committed_state() {
        let k = Keypair::from_seed(1);
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(CHAIN, store.clone(), Arc::new(KvVm)).unwrap();
        let genesis = Genesis {
            chain_id: CHAIN.into(),
            accounts: vec![GenesisAccount {
                address: k.address(),
                coins: Coins::spay(tokens(10)),
            }],
            stakes: vec![],
        };
        let g = ledger.init_genesis(&genesis).unwrap();
        let p = ledger
            .propose_block(&g.header, vec![send(&k, 1, Address::from_bytes([3; 20]))], Address::ZERO, 7)
            .unwrap();
        ledger.commit_block(&p.block, p.view.clone()).unwrap();

        let reopened = Ledger::new(CHAIN, store, Arc::new(KvVm)).unwrap();
        assert_eq!(reopened.head().unwrap(), p.block.header);
        assert_eq!(
            reopened.committed_view().unwrap().state_root(),
            p.block.header.state_root
        );
        assert!(reopened.init_genesis(&genesis).is_ok());
    }
}
