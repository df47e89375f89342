//! # SCPT Validator
//!
//! Turns committed stake pools into the two weighted signer sets the node
//! needs:
//!
//! | Module | Contents |
//! |--------|----------|
//! | `epoch` | `EpochConfig`, epoch arithmetic |
//! | `set` | `ValidatorSet`, voting power, supermajority test |
//! | `proposer` | stake-weighted proposer selection |
//! | `committee` | guardian / elite edge node checkpoint `Committee` |
//! | `manager` | `ValidatorManager` with per-epoch and per-checkpoint caches |
//!
//! Everything here is a pure function of `(height, committed stake state)`.
//! Minimum stake thresholds come from `scpt_common::heights`, selected by
//! block height, so replaying from genesis rebuilds the same sets.

pub mod committee;
pub mod epoch;
pub mod error;
pub mod manager;
pub mod proposer;
pub mod set;

pub use committee::{Committee, CommitteeMember};
pub use epoch::{EpochConfig, DEFAULT_EPOCH_INTERVAL, DEFAULT_MAX_VALIDATORS};
pub use error::{ValidatorError, ValidatorResult};
pub use manager::{StakeSource, ValidatorManager};
pub use proposer::{choose_proposer, proposer_seed};
pub use set::{exceeds_two_thirds, Validator, ValidatorSet};
