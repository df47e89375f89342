//! # SCPT Storage
//!
//! The ledger and consensus layers talk to storage only through the
//! [`KvStore`] trait:
//!
//! - **Versioned space**: point reads at the latest committed height or
//!   "as of" any committed height, prefix scans as of a height, and an
//!   atomic [`WriteBatch`] commit keyed by block height. Heights must be
//!   committed in strictly increasing order.
//! - **Metadata space**: unversioned keys for consensus records (last vote,
//!   finalized blocks, attestations). Writes are immediate.
//!
//! [`MemoryStore`] is the in-process implementation. When opened with a
//! path it persists a full image after every write (temp file + rename),
//! which is enough for restarts of a single node; it is not a database
//! engine.

mod batch;
mod memory;

pub use batch::WriteBatch;
pub use memory::MemoryStore;

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Commit height is not above the last committed height.
    #[error("non-monotonic commit: height {height} <= latest committed {latest}")]
    NonMonotonicCommit { height: u64, latest: u64 },

    /// Read "as of" a height that has not been committed yet.
    #[error("height {requested} not committed (latest {latest:?})")]
    HeightNotCommitted { requested: u64, latest: Option<u64> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Versioned key-value storage consumed by the ledger and consensus crates.
pub trait KvStore: Send + Sync {
    /// Latest committed value for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Value for `key` as of the committed `height`.
    fn get_at(&self, key: &[u8], height: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// All live entries whose key starts with `prefix`, as of `height`.
    fn scan_at(&self, prefix: &[u8], height: u64)
        -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError>;

    /// Atomically apply `batch` as the state of `height`.
    fn commit(&self, height: u64, batch: WriteBatch) -> Result<(), StoreError>;

    /// Highest committed height, if any.
    fn latest_height(&self) -> Option<u64>;

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put_meta(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    fn delete_meta(&self, key: &[u8]) -> Result<(), StoreError>;
}
