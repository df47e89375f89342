//! Epoch arithmetic.
//!
//! Heights are grouped into epochs of `interval` blocks:
//!
//! ```text
//! interval = 100
//!
//!   heights 1..=100    epoch 0   stake state committed at height 0
//!   heights 101..=200  epoch 1   stake state committed at height 100
//!   heights 201..=300  epoch 2   stake state committed at height 200
//! ```
//!
//! The set for an epoch is read from the state committed at the block
//! *before* the epoch starts, so a deposit included in height 150 first
//! counts from height 201.

use serde::{Deserialize, Serialize};

use crate::error::{ValidatorError, ValidatorResult};

pub const DEFAULT_EPOCH_INTERVAL: u64 = 100;

pub const DEFAULT_MAX_VALIDATORS: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Blocks per epoch.
    pub interval: u64,
    /// Size cap of the active validator set.
    pub max_validators: usize,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_EPOCH_INTERVAL,
            max_validators: DEFAULT_MAX_VALIDATORS,
        }
    }
}

impl EpochConfig {
    pub fn new(interval: u64, max_validators: usize) -> ValidatorResult<Self> {
        if interval == 0 {
            return Err(ValidatorError::InvalidEpochConfig);
        }
        Ok(Self {
            interval,
            max_validators,
        })
    }

    /// Epoch containing `height`. Height 0 (genesis) is not voted on; it is
    /// folded into epoch 0.
    #[must_use]
    pub fn epoch_of(&self, height: u64) -> u64 {
        height.saturating_sub(1) / self.interval.max(1)
    }

    /// Height whose committed stake state defines the set for `height`.
    #[must_use]
    pub fn epoch_start(&self, height: u64) -> u64 {
        self.epoch_of(height) * self.interval.max(1)
    }

    /// True for the first height of an epoch.
    #[must_use]
    pub fn is_epoch_boundary(&self, height: u64) -> bool {
        height > 0 && self.epoch_start(height) + 1 == height
    }
}
