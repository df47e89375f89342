//! Gas accounting for fee-paying transactions.
//!
//! Non-contract transactions do not meter execution; they are charged a
//! fixed gas per type so that their flat SPAY fee can be ranked against
//! contract calls on a common price scale.

use num_bigint::BigInt;
use num_traits::Zero;

use crate::tx::Tx;

pub const GAS_SEND_TX_PER_ACCOUNT: u64 = 5_000;
pub const GAS_RESERVE_FUND_TX: u64 = 10_000;
pub const GAS_RELEASE_FUND_TX: u64 = 10_000;
pub const GAS_SPLIT_CONTRACT_TX: u64 = 10_000;
pub const GAS_DEPOSIT_STAKE_TX: u64 = 10_000;
pub const GAS_WITHDRAW_STAKE_TX: u64 = 10_000;
pub const GAS_STAKE_REWARD_DISTRIBUTION_TX: u64 = 10_000;

/// Gas charged for a transfer touching `accounts` accounts. Never below two
/// accounts' worth, so a single-output transfer is not artificially cheap.
#[must_use]
pub fn send_tx_gas(accounts: usize) -> u64 {
    let accounts = accounts.max(2) as u64;
    GAS_SEND_TX_PER_ACCOUNT.saturating_mul(accounts)
}

/// Fixed gas of a non-contract transaction; `None` for contract calls.
pub fn intrinsic_gas(tx: &Tx) -> Option<u64> {
    match tx {
        Tx::Send(t) | Tx::EdgeStake(t) => Some(send_tx_gas(t.inputs.len() + t.outputs.len())),
        Tx::DepositStake(_) => Some(GAS_DEPOSIT_STAKE_TX),
        Tx::WithdrawStake(_) => Some(GAS_WITHDRAW_STAKE_TX),
        Tx::ReserveFund(_) => Some(GAS_RESERVE_FUND_TX),
        Tx::ReleaseFund(_) => Some(GAS_RELEASE_FUND_TX),
        Tx::SplitRule(_) => Some(GAS_SPLIT_CONTRACT_TX),
        Tx::StakeRewardDistribution(_) => Some(GAS_STAKE_REWARD_DISTRIBUTION_TX),
        Tx::SmartContract(_) => None,
    }
}

/// Price per unit of gas (SPAY wei), used to rank pending transactions.
pub fn effective_gas_price(tx: &Tx) -> BigInt {
    if let Tx::SmartContract(t) = tx {
        return t.gas_price.clone();
    }
    match intrinsic_gas(tx) {
        Some(gas) if gas > 0 => tx.fee().spay / BigInt::from(gas),
        _ => BigInt::zero(),
    }
}
