//! # Transaction Execution
//!
//! Every transaction type goes through the same two phases against a
//! [`StoreView`]:
//!
//! ```text
//!   sanity_check(view)        read-only; any failure rejects the tx
//!          │
//!          ▼
//!   process(&mut view)        mutates; only ever runs after a passing check
//! ```
//!
//! `check_tx` runs the first phase only. Mempool screening, building and
//! re-executing a block run both; screening does so against a private
//! copy of the committed state. A failure in `process`
//! after a passing `sanity_check` means the node's state or code is broken
//! and is reported as [`LedgerError::Internal`].
//!
//! | File | Transaction types |
//! |------|-------------------|
//! | `send.rs` | `Send`, `EdgeStake` |
//! | `stake.rs` | `DepositStake`, `WithdrawStake` |
//! | `reserve.rs` | `ReserveFund`, `ReleaseFund` |
//! | `split_rule.rs` | `SplitRule` |
//! | `srd.rs` | `StakeRewardDistribution` |
//! | `contract.rs` | `SmartContract` |

mod common;
mod contract;
mod reserve;
mod send;
mod split_rule;
mod srd;
mod stake;

pub(crate) use common::credit;
pub(crate) use stake::process_stake_returns;
pub use split_rule::MAXIMUM_SPLIT_CONTRACT_DURATION;
pub use srd::MAXIMUM_SPLIT_BASIS_POINT;
pub use stake::stake_return_height;

use scpt_common::{Address, Coins, Hash};
use tracing::trace;

use crate::error::{LedgerError, LedgerResult};
use crate::state::StoreView;
use crate::tx::{Tx, TxKind};
use crate::vm::VirtualMachine;

pub(crate) use contract::run_contract_call;

/// Per-transaction environment handed to executors.
pub(crate) struct TxEnv<'a> {
    pub kind: TxKind,
    pub sign_bytes: Vec<u8>,
    pub vm: &'a dyn VirtualMachine,
}

/// Result of applying one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_id: Hash,
    /// Coins removed from circulation as fee (gas charge for contract calls).
    pub fee: Coins,
    pub gas_used: u64,
    pub vm_output: Vec<u8>,
    pub reverted: bool,
    pub contract_address: Option<Address>,
}

impl TxOutcome {
    fn with_fee(tx_id: Hash, fee: Coins) -> Self {
        Self {
            tx_id,
            fee,
            gas_used: 0,
            vm_output: Vec::new(),
            reverted: false,
            contract_address: None,
        }
    }
}

pub(crate) trait TxExecutor {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()>;
    fn process(&self, env: &TxEnv<'_>, view: &mut StoreView, tx_id: Hash)
        -> LedgerResult<TxOutcome>;
}

fn executor_for(tx: &Tx) -> &dyn TxExecutor {
    match tx {
        Tx::Send(t) | Tx::EdgeStake(t) => t,
        Tx::DepositStake(t) => t,
        Tx::WithdrawStake(t) => t,
        Tx::ReserveFund(t) => t,
        Tx::ReleaseFund(t) => t,
        Tx::SplitRule(t) => t,
        Tx::StakeRewardDistribution(t) => t,
        Tx::SmartContract(t) => t,
    }
}

/// Dispatches transactions to their executors.
pub struct Executor<'a> {
    chain_id: &'a str,
    vm: &'a dyn VirtualMachine,
}

impl<'a> Executor<'a> {
    pub fn new(chain_id: &'a str, vm: &'a dyn VirtualMachine) -> Self {
        Self { chain_id, vm }
    }

    fn env(&self, tx: &Tx) -> LedgerResult<TxEnv<'a>> {
        Ok(TxEnv {
            kind: tx.kind(),
            sign_bytes: tx.sign_bytes(self.chain_id)?,
            vm: self.vm,
        })
    }

    /// Validate-only. Never mutates `view`.
    pub fn sanity_check(&self, tx: &Tx, view: &StoreView) -> LedgerResult<()> {
        let env = self.env(tx)?;
        executor_for(tx).sanity_check(&env, view)
    }

    /// Validate, then apply to `view`.
    pub fn execute(&self, tx: &Tx, view: &mut StoreView) -> LedgerResult<TxOutcome> {
        let env = self.env(tx)?;
        let exec = executor_for(tx);
        exec.sanity_check(&env, view)?;
        let tx_id = tx.tx_id(self.chain_id)?;
        let outcome = exec.process(&env, view, tx_id).map_err(|e| {
            if e.is_fault() {
                e
            } else {
                LedgerError::Internal(format!(
                    "{} {} failed to apply after validation: {}",
                    env.kind.as_str(),
                    tx_id.short(),
                    e
                ))
            }
        })?;
        trace!(kind = env.kind.as_str(), tx = %tx_id.short(), "applied transaction");
        Ok(outcome)
    }
}
