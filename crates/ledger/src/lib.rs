//! # SCPT Ledger
//!
//! Deterministic execution engine for the SCPT chain: accounts, stakes,
//! reserved funds and contracts, the transactions that change them, and
//! the block pipeline that commits them.
//!
//! ## Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | `error` | `LedgerError`, stable `ErrorCode`s |
//! | `account` | `Account`, reserved-fund bookkeeping |
//! | `stake` | `StakePurpose`, `CandidatePool` deposits and withdrawals |
//! | `tx` | closed `Tx` enum, signing payload, tx id |
//! | `gas` | per-type gas and effective gas price |
//! | `state` | `StoreView` working state, key layout, state root |
//! | `vm` | `VirtualMachine` interface, `KvVm` test machine |
//! | `execution` | two-phase validate/apply per transaction type |
//! | `reward` | checkpoint staking rewards |
//! | `block` | `Block`, `BlockHeader` |
//! | `genesis` | JSON genesis document |
//! | `ledger` | `Ledger` facade: screening, propose/validate/commit, queries |
//! | `mempool` | admission gate ranked by effective gas price |
//!
//! ## Determinism
//!
//! Nothing under this crate reads the wall clock or iterates a hash map
//! when producing state. Two nodes that apply the same ordered blocks to
//! the same genesis hold byte-identical `StoreView`s.

pub mod account;
pub mod block;
pub mod error;
pub mod execution;
pub mod gas;
pub mod genesis;
pub mod ledger;
pub mod mempool;
pub mod reward;
pub mod stake;
pub mod state;
pub mod tx;
pub mod vm;

pub use account::{Account, ReservedFund};
pub use block::{Block, BlockHeader};
pub use error::{ErrorCode, LedgerError, LedgerResult};
pub use execution::{Executor, TxOutcome};
pub use genesis::{Genesis, GenesisAccount, GenesisError, GenesisStake};
pub use ledger::{Ledger, ProposedBlock};
pub use mempool::{Mempool, MempoolError, DEFAULT_MEMPOOL_CAPACITY};
pub use stake::{CandidatePool, Stake, StakeHolder, StakePurpose};
pub use state::{SplitContract, StakeRewardDistributionRule, StakeSnapshot, StoreView};
pub use tx::{
    DepositStakeTx, HolderSignature, ReleaseFundTx, ReserveFundTx, SendTx, SmartContractTx,
    Split, SplitRuleTx, StakeRewardDistributionTx, Tx, TxInput, TxKind, TxOutput,
    WithdrawStakeTx,
};
pub use vm::{KvVm, VirtualMachine, VmOutcome};
