//! Ledger error taxonomy.
//!
//! Every rejection carries a stable [`ErrorCode`] so clients can tell a
//! retryable condition (fee too low, sequence ahead of the account) from a
//! permanent one (insufficient funds, bad signature). Codes are part of
//! the external interface and never change meaning.

use scpt_common::{Address, BigInt, Coins, Hash};
use scpt_storage::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    Generic = 100_000,
    InvalidSignature = 100_001,
    InvalidSequence = 100_002,
    InsufficientFund = 100_003,
    InvalidFee = 100_004,
    MalformedTx = 100_005,
    TooManyAccounts = 100_006,
    Unbalanced = 100_007,
    UnknownAccount = 100_008,
    InvalidBlock = 100_009,
    DuplicateTx = 100_010,
    MempoolFull = 100_011,
    ReserveFundCheckFailed = 100_101,
    ReleaseFundCheckFailed = 100_102,
    SplitRuleCheckFailed = 100_103,
    InvalidStake = 100_201,
    InvalidStakeRewardDistribution = 100_202,
    InvalidGasPrice = 100_301,
    InvalidGasLimit = 100_302,
    FeatureNotActive = 100_303,
    ContractTransferNotAllowed = 100_304,
    VmFailure = 100_305,
    Internal = 199_999,
}

impl ErrorCode {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    // ─────────────────────────────────────────────────────────────────────────
    // malformed input
    // ─────────────────────────────────────────────────────────────────────────
    #[error("malformed transaction: {0}")]
    Malformed(String),

    #[error("invalid signature for input {0}")]
    InvalidSignature(Address),

    #[error("transaction modifies {count} accounts, at most {max} allowed")]
    TooManyAccounts { count: usize, max: usize },

    #[error("decode error: {0}")]
    Decode(String),

    // ─────────────────────────────────────────────────────────────────────────
    // economic policy
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid sequence for {address}: expected {expected}, got {got}")]
    InvalidSequence {
        address: Address,
        expected: u64,
        got: u64,
    },

    #[error("insufficient fund in {address}: balance ({balance}) < required ({required})")]
    InsufficientFund {
        address: Address,
        balance: Coins,
        required: Coins,
    },

    #[error("insufficient fee: needs at least {min} SPAYWei and no SCPT, got ({got})")]
    InvalidFee { min: BigInt, got: Coins },

    #[error("input total ({inputs}) != output total + fee ({outputs_plus_fee})")]
    Unbalanced {
        inputs: Coins,
        outputs_plus_fee: Coins,
    },

    #[error("account {0} not found")]
    UnknownAccount(Address),

    #[error("sending SCPT/SPAY to smart contract {0} through a transfer is not allowed")]
    ContractTransferNotAllowed(Address),

    #[error("reserve fund check failed: {0}")]
    ReserveFundCheck(String),

    #[error("release fund check failed: {0}")]
    ReleaseFundCheck(String),

    #[error("split rule check failed: {0}")]
    SplitRuleCheck(String),

    #[error("stake check failed: {0}")]
    StakeCheck(String),

    #[error("stake reward distribution check failed: {0}")]
    StakeRewardDistributionCheck(String),

    #[error("gas price {got} below minimum {min}")]
    InvalidGasPrice { min: BigInt, got: BigInt },

    #[error("gas limit {got} above maximum {max}")]
    InvalidGasLimit { max: u64, got: u64 },

    #[error("{feature} not active at height {height}")]
    FeatureNotActive { feature: &'static str, height: u64 },

    #[error("vm failure: {0}")]
    Vm(String),

    // ─────────────────────────────────────────────────────────────────────────
    // block level
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("state root mismatch: header {expected}, computed {computed}")]
    StateRootMismatch { expected: Hash, computed: Hash },

    #[error("transaction {index} in block failed: {source}")]
    BlockTx {
        index: usize,
        #[source]
        source: Box<LedgerError>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // faults (never a client's fault)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable code reported to clients.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::Malformed(_) | LedgerError::Decode(_) => ErrorCode::MalformedTx,
            LedgerError::InvalidSignature(_) => ErrorCode::InvalidSignature,
            LedgerError::TooManyAccounts { .. } => ErrorCode::TooManyAccounts,
            LedgerError::InvalidSequence { .. } => ErrorCode::InvalidSequence,
            LedgerError::InsufficientFund { .. } => ErrorCode::InsufficientFund,
            LedgerError::InvalidFee { .. } => ErrorCode::InvalidFee,
            LedgerError::Unbalanced { .. } => ErrorCode::Unbalanced,
            LedgerError::UnknownAccount(_) => ErrorCode::UnknownAccount,
            LedgerError::ContractTransferNotAllowed(_) => ErrorCode::ContractTransferNotAllowed,
            LedgerError::ReserveFundCheck(_) => ErrorCode::ReserveFundCheckFailed,
            LedgerError::ReleaseFundCheck(_) => ErrorCode::ReleaseFundCheckFailed,
            LedgerError::SplitRuleCheck(_) => ErrorCode::SplitRuleCheckFailed,
            LedgerError::StakeCheck(_) => ErrorCode::InvalidStake,
            LedgerError::StakeRewardDistributionCheck(_) => {
                ErrorCode::InvalidStakeRewardDistribution
            }
            LedgerError::InvalidGasPrice { .. } => ErrorCode::InvalidGasPrice,
            LedgerError::InvalidGasLimit { .. } => ErrorCode::InvalidGasLimit,
            LedgerError::FeatureNotActive { .. } => ErrorCode::FeatureNotActive,
            LedgerError::Vm(_) => ErrorCode::VmFailure,
            LedgerError::InvalidBlock(_) | LedgerError::StateRootMismatch { .. } => {
                ErrorCode::InvalidBlock
            }
            LedgerError::BlockTx { source, .. } => source.code(),
            LedgerError::Store(_) | LedgerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether resubmitting the same transaction later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::InvalidFee { .. } | LedgerError::InvalidGasPrice { .. } => true,
            LedgerError::InvalidSequence { expected, got, .. } => got > expected,
            LedgerError::FeatureNotActive { .. } => true,
            LedgerError::UnknownAccount(_) => true,
            _ => false,
        }
    }

    /// Faults indicate a bug or storage problem rather than a bad transaction.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, LedgerError::Store(_) | LedgerError::Internal(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::InvalidFee.as_u32(), 100_004);
        assert_eq!(ErrorCode::InsufficientFund.as_u32(), 100_003);
        assert_eq!(ErrorCode::Internal.as_u32(), 199_999);
    }

    #[test]
    fn fee_is_retryable_funds_are_not() {
        let fee = LedgerError::InvalidFee {
            min: BigInt::from(10),
            got: Coins::spay(1),
        };
        assert!(fee.is_retryable());
        assert_eq!(fee.code(), ErrorCode::InvalidFee);

        let funds = LedgerError::InsufficientFund {
            address: Address::ZERO,
            balance: Coins::zero(),
            required: Coins::spay(1),
        };
        assert!(!funds.is_retryable());
    }

    #[test]
    fn sequence_ahead_is_retryable() {
        let ahead = LedgerError::InvalidSequence {
            address: Address::ZERO,
            expected: 2,
            got: 5,
        };
        let behind = LedgerError::InvalidSequence {
            address: Address::ZERO,
            expected: 2,
            got: 1,
        };
        assert!(ahead.is_retryable());
        assert!(!behind.is_retryable());
    }

    #[test]
    fn block_tx_error_reports_inner_code() {
        let e = LedgerError::BlockTx {
            index: 3,
            source: Box::new(LedgerError::InvalidSignature(Address::ZERO)),
        };
        assert_eq!(e.code(), ErrorCode::InvalidSignature);
    }
}
