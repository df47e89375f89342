//! Smart contract calls and deploys.
//!
//! The value transfer and the VM's mutations are applied on top of a
//! checkpointed view. A revert (from the VM, running out of gas, or a
//! mutation that cannot be applied) restores the checkpoint; the gas fee
//! and the sequence bump are charged either way.

use num_bigint::BigInt;
use num_traits::Zero;
use scpt_common::heights::{maximum_tx_gas_limit, minimum_gas_price, smart_contract_enabled};
use scpt_common::{Address, Coins, Hash};
use tracing::debug;

use super::common::{credit, debit, get_input, validate_input_advanced, validate_input_basic};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::state::StoreView;
use crate::tx::SmartContractTx;
use crate::vm::{contract_address, StateMutation, VirtualMachine, VmCall, VmOutcome};

impl SmartContractTx {
    fn max_gas_fee(&self) -> Coins {
        Coins::spay(&self.gas_price * BigInt::from(self.gas_limit))
    }

    fn is_deploy(&self) -> bool {
        self.to.address.is_zero()
    }
}

impl TxExecutor for SmartContractTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        let height = view.block_height();
        if !smart_contract_enabled(height) {
            return Err(LedgerError::FeatureNotActive {
                feature: "smart contracts",
                height,
            });
        }
        validate_input_basic(&self.from)?;
        if !self.from.coins.scpt.is_zero() {
            return Err(LedgerError::Malformed(
                "contract calls can only carry SPAY value".into(),
            ));
        }
        if self.is_deploy() && self.data.is_empty() {
            return Err(LedgerError::Malformed("deploy without code".into()));
        }

        let min_price = minimum_gas_price(height);
        if self.gas_price < min_price {
            return Err(LedgerError::InvalidGasPrice {
                min: min_price,
                got: self.gas_price.clone(),
            });
        }
        let max_limit = maximum_tx_gas_limit(height);
        if self.gas_limit > max_limit {
            return Err(LedgerError::InvalidGasLimit {
                max: max_limit,
                got: self.gas_limit,
            });
        }

        let account = get_input(view, &self.from)?;
        let required = self.from.coins.plus(&self.max_gas_fee());
        validate_input_advanced(&account, &env.sign_bytes, &self.from, &required)
    }

    fn process(
        &self,
        env: &TxEnv<'_>,
        view: &mut StoreView,
        tx_id: Hash,
    ) -> LedgerResult<TxOutcome> {
        let (outcome, contract) = run_contract_call(env.vm, self, view)?;

        let fee = Coins::spay(&self.gas_price * BigInt::from(outcome.gas_used));
        let mut account = get_input(view, &self.from)?;
        debit(&mut account, &fee, view.block_height())?;
        account.sequence = self.from.sequence;
        view.set_account(&account)?;

        debug!(
            tx = %tx_id.short(),
            contract = %contract,
            gas_used = outcome.gas_used,
            reverted = outcome.reverted,
            "contract call applied"
        );
        Ok(TxOutcome {
            tx_id,
            fee,
            gas_used: outcome.gas_used,
            vm_output: outcome.output,
            reverted: outcome.reverted,
            contract_address: (self.is_deploy() && !outcome.reverted).then_some(contract),
        })
    }
}

/// Transfer the call value, run the VM and apply its mutations, restoring
/// `view` on revert. Does not charge gas or touch the caller's sequence.
pub(crate) fn run_contract_call(
    vm: &dyn VirtualMachine,
    tx: &SmartContractTx,
    view: &mut StoreView,
) -> LedgerResult<(VmOutcome, Address)> {
    let height = view.block_height();
    let deploy = tx.is_deploy();
    let contract = if deploy {
        contract_address(&tx.from.address, tx.from.sequence)
    } else {
        tx.to.address
    };
    let checkpoint = view.clone();

    let mut caller = get_input(view, &tx.from)?;
    if let Err(e) = debit(&mut caller, &tx.from.coins, height) {
        return Ok((revert(view, checkpoint, e.to_string()), contract));
    }
    view.set_account(&caller)?;
    let mut target = view.get_or_make_account(&contract)?;
    credit(&mut target, &tx.from.coins, height);
    view.set_account(&target)?;

    let call = VmCall {
        caller: tx.from.address,
        contract,
        value: tx.from.coins.clone(),
        data: &tx.data,
        gas_limit: tx.gas_limit,
        block_height: height,
        deploy,
    };
    let mut outcome = vm.execute(&call, &*view);
    // never charge past the limit the sender signed for
    outcome.gas_used = outcome.gas_used.min(tx.gas_limit);
    if outcome.reverted {
        *view = checkpoint;
        return Ok((outcome, contract));
    }

    if deploy {
        let code_hash = view.set_code(&outcome.output);
        let mut acc = view.get_or_make_account(&contract)?;
        acc.code_hash = Some(code_hash);
        acc.storage_root = Some(view.contract_storage_root(&contract));
        view.set_account(&acc)?;
    }
    if let Err(reason) = apply_mutations(view, contract, &outcome.mutations, height)? {
        let gas_used = outcome.gas_used;
        let mut reverted = revert(view, checkpoint, reason);
        reverted.gas_used = gas_used;
        return Ok((reverted, contract));
    }
    Ok((outcome, contract))
}

fn revert(view: &mut StoreView, checkpoint: StoreView, reason: String) -> VmOutcome {
    *view = checkpoint;
    VmOutcome {
        reverted: true,
        error: Some(reason),
        ..VmOutcome::default()
    }
}

/// Outer error: state fault. Inner error: the call must revert.
fn apply_mutations(
    view: &mut StoreView,
    contract: Address,
    mutations: &[StateMutation],
    height: u64,
) -> LedgerResult<Result<(), String>> {
    let mut storage_touched = false;
    for m in mutations {
        match m {
            StateMutation::SetStorage {
                contract: target,
                key,
                value,
            } => {
                if *target != contract {
                    return Ok(Err(format!("write to foreign contract {}", target)));
                }
                view.set_contract_storage(target, key, value.clone());
                storage_touched = true;
            }
            StateMutation::Transfer { from, to, coins } => {
                if *from != contract {
                    return Ok(Err(format!("transfer from foreign account {}", from)));
                }
                if !coins.is_valid() {
                    return Ok(Err(format!("invalid transfer amount ({})", coins)));
                }
                let mut src = view.get_or_make_account(from)?;
                if debit(&mut src, coins, height).is_err() {
                    return Ok(Err("contract balance too low".into()));
                }
                view.set_account(&src)?;
                let mut dst = view.get_or_make_account(to)?;
                credit(&mut dst, coins, height);
                view.set_account(&dst)?;
            }
        }
    }
    if storage_touched {
        let mut acc = view.get_or_make_account(&contract)?;
        acc.storage_root = Some(view.contract_storage_root(&contract));
        view.set_account(&acc)?;
    }
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::tx::{TxInput, TxKind, TxOutput};
    use crate::vm::ContractState;

    /// Reports far more gas than any limit allows.
    struct Greedy;

    impl VirtualMachine for Greedy {
        fn execute(&self, _call: &VmCall<'_>, _state: &dyn ContractState) -> VmOutcome {
            VmOutcome {
                gas_used: u64::MAX,
                ..VmOutcome::default()
            }
        }
    }

    #[test]
    fn fee_is_capped_at_the_gas_limit() {
        let from = Address::from_bytes([1; 20]);
        let mut view = StoreView::new(5);
        let mut account = Account::new(from);
        account.balance = Coins::spay(10_000_000_000_000_000u64);
        view.set_account(&account).unwrap();

        let tx = SmartContractTx {
            from: TxInput::new(from, Coins::zero(), 1),
            to: TxOutput::new(Address::from_bytes([2; 20]), Coins::zero()),
            gas_limit: 50_000,
            gas_price: BigInt::from(100_000_000u64),
            data: vec![1],
        };
        let env = TxEnv {
            kind: TxKind::SmartContract,
            sign_bytes: Vec::new(),
            vm: &Greedy,
        };
        let outcome = tx.process(&env, &mut view, Hash::ZERO).unwrap();
        assert_eq!(outcome.gas_used, 50_000);
        assert_eq!(outcome.fee, tx.max_gas_fee());

        let charged = account.balance.minus(&view.get_account(&from).unwrap().unwrap().balance);
        assert_eq!(charged, tx.max_gas_fee());
    }
}
