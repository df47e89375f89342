//! Account model and reserved-fund bookkeeping.

use scpt_common::{Address, Coins, Hash};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Minimum number of blocks a fund can be reserved for.
pub const MINIMUM_FUND_RESERVE_DURATION: u64 = 300;

/// Maximum number of blocks a fund can be reserved for.
pub const MAXIMUM_FUND_RESERVE_DURATION: u64 = 12 * 3600;

/// Blocks after expiry during which a reservation cannot be released,
/// leaving room to settle disputes over off-chain payments.
pub const RESERVED_FUND_FREEZE_PERIOD_DURATION: u64 = 5;

/// Maximum number of resource ids (targets) bound to one reservation.
pub const MAXIMUM_TARGET_ADDRESSES_FOR_STAKE_BINDING: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedFund {
    pub collateral: Coins,
    pub initial_fund: Coins,
    pub resource_ids: Vec<String>,
    pub end_block_height: u64,
    pub reserve_sequence: u64,
}

impl ReservedFund {
    /// Amount handed back on release. Payments against the fund settle off
    /// chain, so the whole reservation returns.
    pub fn refund(&self) -> Coins {
        self.collateral.plus(&self.initial_fund)
    }

    #[must_use]
    pub fn releasable_at(&self) -> u64 {
        self.end_block_height + RESERVED_FUND_FREEZE_PERIOD_DURATION
    }
}

/// Ledger account. Created on first credit and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub sequence: u64,
    pub balance: Coins,
    pub reserved_funds: Vec<ReservedFund>,
    pub last_updated_block_height: u64,
    /// Hash of the contract code, for smart-contract accounts.
    pub code_hash: Option<Hash>,
    /// Commitment over the contract's storage entries.
    pub storage_root: Option<Hash>,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            sequence: 0,
            balance: Coins::zero(),
            reserved_funds: Vec::new(),
            last_updated_block_height: 0,
            code_hash: None,
            storage_root: None,
        }
    }

    #[must_use]
    pub fn is_smart_contract(&self) -> bool {
        self.code_hash.is_some()
    }

    /// Validate a reservation request against this account.
    pub fn check_reserve_fund(
        &self,
        collateral: &Coins,
        fund: &Coins,
        duration: u64,
        reserve_sequence: u64,
    ) -> LedgerResult<()> {
        if duration < MINIMUM_FUND_RESERVE_DURATION {
            return Err(LedgerError::ReserveFundCheck(format!(
                "duration {} below minimum {}",
                duration, MINIMUM_FUND_RESERVE_DURATION
            )));
        }
        if duration > MAXIMUM_FUND_RESERVE_DURATION {
            return Err(LedgerError::ReserveFundCheck(format!(
                "duration {} above maximum {}",
                duration, MAXIMUM_FUND_RESERVE_DURATION
            )));
        }
        if self
            .reserved_funds
            .iter()
            .any(|rf| rf.reserve_sequence == reserve_sequence)
        {
            return Err(LedgerError::ReserveFundCheck(format!(
                "reserve sequence {} already used",
                reserve_sequence
            )));
        }
        if !fund.scpt.is_zero() || !fund.is_positive() {
            return Err(LedgerError::ReserveFundCheck(
                "only a positive SPAY amount can be reserved".into(),
            ));
        }
        if !collateral.scpt.is_zero() || !collateral.is_positive() {
            return Err(LedgerError::ReserveFundCheck(
                "collateral must be a positive SPAY amount".into(),
            ));
        }
        if !collateral.minus(fund).is_positive() {
            return Err(LedgerError::ReserveFundCheck(format!(
                "collateral ({}) must be greater than fund ({})",
                collateral, fund
            )));
        }
        let required = collateral.plus(fund);
        if !self.balance.is_gte(&required) {
            return Err(LedgerError::InsufficientFund {
                address: self.address,
                balance: self.balance.clone(),
                required,
            });
        }
        Ok(())
    }

    /// Move `fund + collateral` out of the spendable balance into a reservation.
    pub fn reserve_fund(
        &mut self,
        collateral: Coins,
        fund: Coins,
        resource_ids: Vec<String>,
        end_block_height: u64,
        reserve_sequence: u64,
    ) {
        self.balance = self.balance.minus(&collateral.plus(&fund));
        self.reserved_funds.push(ReservedFund {
            collateral,
            initial_fund: fund,
            resource_ids,
            end_block_height,
            reserve_sequence,
        });
    }

    pub fn check_release_fund(&self, block_height: u64, reserve_sequence: u64) -> LedgerResult<()> {
        let Some(rf) = self
            .reserved_funds
            .iter()
            .find(|rf| rf.reserve_sequence == reserve_sequence)
        else {
            return Err(LedgerError::ReleaseFundCheck(format!(
                "no reserved fund with sequence {}",
                reserve_sequence
            )));
        };
        if block_height < rf.releasable_at() {
            return Err(LedgerError::ReleaseFundCheck(format!(
                "fund reserved until {} is frozen until height {}, current height {}",
                rf.end_block_height,
                rf.releasable_at(),
                block_height
            )));
        }
        Ok(())
    }

    /// Return the unspent part of a reservation to the balance. Returns the refunded amount.
    pub fn release_fund(&mut self, reserve_sequence: u64) -> Option<Coins> {
        let idx = self
            .reserved_funds
            .iter()
            .position(|rf| rf.reserve_sequence == reserve_sequence)?;
        let rf = self.reserved_funds.remove(idx);
        let refund = rf.refund();
        self.balance = self.balance.plus(&refund);
        Some(refund)
    }

    /// Total coins currently held in reservations.
    pub fn reserved_total(&self) -> Coins {
        self.reserved_funds
            .iter()
            .fold(Coins::zero(), |acc, rf| acc.plus(&rf.refund()))
    }
}
