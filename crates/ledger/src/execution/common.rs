//! Checks and balance adjustments shared by the executors.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use scpt_common::heights::{
    minimum_gas_price, minimum_transaction_fee, smart_contract_enabled, MAX_ACCOUNTS_AFFECTED_PER_TX,
};
use scpt_common::{Address, Coins};

use crate::account::Account;
use crate::error::{LedgerError, LedgerResult};
use crate::gas::send_tx_gas;
use crate::state::StoreView;
use crate::tx::{TxInput, TxOutput};

pub(crate) type Accounts = BTreeMap<Address, Account>;

/// Structural checks on inputs: well-formed coins, no zero or repeated address.
pub(crate) fn validate_inputs_basic(inputs: &[TxInput]) -> LedgerResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    for input in inputs {
        validate_input_basic(input)?;
        if !seen.insert(input.address) {
            return Err(LedgerError::Malformed(format!(
                "duplicate input address {}",
                input.address
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_input_basic(input: &TxInput) -> LedgerResult<()> {
    if input.address.is_zero() {
        return Err(LedgerError::Malformed("input address is zero".into()));
    }
    if !input.coins.is_valid() {
        return Err(LedgerError::Malformed(format!(
            "invalid input coins ({}) for {}",
            input.coins, input.address
        )));
    }
    if input.sequence == 0 {
        return Err(LedgerError::Malformed(format!(
            "input sequence for {} must be positive",
            input.address
        )));
    }
    Ok(())
}

pub(crate) fn validate_outputs_basic(outputs: &[TxOutput]) -> LedgerResult<()> {
    for output in outputs {
        validate_output_basic(output)?;
    }
    Ok(())
}

pub(crate) fn validate_output_basic(output: &TxOutput) -> LedgerResult<()> {
    if output.address.is_zero() {
        return Err(LedgerError::Malformed("output address is zero".into()));
    }
    if !output.coins.is_valid() {
        return Err(LedgerError::Malformed(format!(
            "invalid output coins ({}) for {}",
            output.coins, output.address
        )));
    }
    Ok(())
}

pub(crate) fn check_accounts_affected(count: usize) -> LedgerResult<()> {
    if count > MAX_ACCOUNTS_AFFECTED_PER_TX {
        return Err(LedgerError::TooManyAccounts {
            count,
            max: MAX_ACCOUNTS_AFFECTED_PER_TX,
        });
    }
    Ok(())
}

/// Load every input account. Inputs must refer to existing accounts.
pub(crate) fn get_inputs(view: &StoreView, inputs: &[TxInput]) -> LedgerResult<Accounts> {
    let mut accounts = Accounts::new();
    for input in inputs {
        let account = view
            .get_account(&input.address)?
            .ok_or(LedgerError::UnknownAccount(input.address))?;
        accounts.insert(input.address, account);
    }
    Ok(accounts)
}

pub(crate) fn get_input(view: &StoreView, input: &TxInput) -> LedgerResult<Account> {
    view.get_account(&input.address)?
        .ok_or(LedgerError::UnknownAccount(input.address))
}

/// Add output accounts to `accounts`, creating zero-balance ones as needed.
pub(crate) fn get_or_make_outputs(
    view: &StoreView,
    accounts: &mut Accounts,
    outputs: &[TxOutput],
) -> LedgerResult<()> {
    for output in outputs {
        if accounts.contains_key(&output.address) {
            continue;
        }
        let account = view.get_or_make_account(&output.address)?;
        accounts.insert(output.address, account);
    }
    Ok(())
}

/// Reject plain transfers into contract accounts once contracts are live.
pub(crate) fn check_no_contract_outputs(
    accounts: &Accounts,
    outputs: &[TxOutput],
    block_height: u64,
) -> LedgerResult<()> {
    if !smart_contract_enabled(block_height) {
        return Ok(());
    }
    for output in outputs {
        if let Some(acc) = accounts.get(&output.address) {
            if acc.is_smart_contract() {
                return Err(LedgerError::ContractTransferNotAllowed(output.address));
            }
        }
    }
    Ok(())
}

/// Sequence, then balance against `required`, then signature.
pub(crate) fn validate_input_advanced(
    account: &Account,
    sign_bytes: &[u8],
    input: &TxInput,
    required: &Coins,
) -> LedgerResult<()> {
    let expected = account.sequence + 1;
    if input.sequence != expected {
        return Err(LedgerError::InvalidSequence {
            address: input.address,
            expected,
            got: input.sequence,
        });
    }
    if !account.balance.is_gte(required) {
        return Err(LedgerError::InsufficientFund {
            address: input.address,
            balance: account.balance.clone(),
            required: required.clone(),
        });
    }
    if !input.verify(sign_bytes) {
        return Err(LedgerError::InvalidSignature(input.address));
    }
    Ok(())
}

/// Advanced checks on every input; returns the input total.
pub(crate) fn validate_inputs_advanced(
    accounts: &Accounts,
    sign_bytes: &[u8],
    inputs: &[TxInput],
) -> LedgerResult<Coins> {
    let mut total = Coins::zero();
    for input in inputs {
        let account = accounts
            .get(&input.address)
            .ok_or(LedgerError::UnknownAccount(input.address))?;
        validate_input_advanced(account, sign_bytes, input, &input.coins)?;
        total = total.plus(&input.coins);
    }
    Ok(total)
}

/// Fee must be pure SPAY and at least the floor in force at `block_height`.
pub(crate) fn sanity_check_for_fee(fee: &Coins, block_height: u64) -> LedgerResult<()> {
    let min = minimum_transaction_fee(block_height);
    if !fee.scpt.is_zero() || fee.spay.is_negative() || fee.spay < min {
        return Err(LedgerError::InvalidFee {
            min,
            got: fee.clone(),
        });
    }
    Ok(())
}

/// A transfer's fee spread over the accounts it touches must still pay the
/// gas price floor, so wide fan-outs cannot ride on the flat minimum fee.
pub(crate) fn sanity_check_for_transfer_price(
    fee: &Coins,
    accounts_affected: usize,
    block_height: u64,
) -> LedgerResult<()> {
    let min = minimum_gas_price(block_height);
    let got = &fee.spay / BigInt::from(send_tx_gas(accounts_affected));
    if got < min {
        return Err(LedgerError::InvalidGasPrice { min, got });
    }
    Ok(())
}

pub(crate) fn sum_outputs(outputs: &[TxOutput]) -> Coins {
    outputs
        .iter()
        .fold(Coins::zero(), |acc, o| acc.plus(&o.coins))
}

/// Debit inputs and bump their sequences.
pub(crate) fn adjust_by_inputs(
    view: &mut StoreView,
    accounts: &mut Accounts,
    inputs: &[TxInput],
) -> LedgerResult<()> {
    let height = view.block_height();
    for input in inputs {
        let account = accounts
            .get_mut(&input.address)
            .ok_or(LedgerError::UnknownAccount(input.address))?;
        debit(account, &input.coins, height)?;
        account.sequence = input.sequence;
        view.set_account(account)?;
    }
    Ok(())
}

pub(crate) fn adjust_by_outputs(
    view: &mut StoreView,
    accounts: &mut Accounts,
    outputs: &[TxOutput],
) -> LedgerResult<()> {
    let height = view.block_height();
    for output in outputs {
        let account = accounts
            .get_mut(&output.address)
            .ok_or(LedgerError::UnknownAccount(output.address))?;
        credit(account, &output.coins, height);
        view.set_account(account)?;
    }
    Ok(())
}

/// Subtract `coins`; never lets a stored balance go negative.
pub(crate) fn debit(account: &mut Account, coins: &Coins, height: u64) -> LedgerResult<()> {
    let balance = account.balance.minus(coins);
    if !balance.is_valid() {
        return Err(LedgerError::InsufficientFund {
            address: account.address,
            balance: account.balance.clone(),
            required: coins.clone(),
        });
    }
    account.balance = balance;
    account.last_updated_block_height = height;
    Ok(())
}

pub(crate) fn credit(account: &mut Account, coins: &Coins, height: u64) {
    account.balance = account.balance.plus(coins);
    account.last_updated_block_height = height;
}
