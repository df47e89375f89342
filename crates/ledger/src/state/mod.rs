//! # Ledger State View
//!
//! `StoreView` is the in-memory working copy of the ledger state at one
//! height. Executors read and write it through typed helpers; once a block
//! is validated, the set of touched keys becomes one [`WriteBatch`]
//! committed atomically at the block height.
//!
//! ## Key Layout
//!
//! | Prefix | Value |
//! |--------|-------|
//! | `ls/a/<addr>` | `Account` |
//! | `ls/ssc/vcp` `ls/ssc/gcp` `ls/ssc/eenp` | `CandidatePool` per stake purpose |
//! | `ls/split/<hex rid>` | `SplitContract` |
//! | `ls/srd/<addr>` | `StakeRewardDistributionRule` |
//! | `ls/code/<hash>` | contract code bytes |
//! | `ls/st/<addr>/<hex key>` | contract storage value |
//!
//! All values are bincode. Keys sort byte-wise, which fixes the leaf order
//! of the state root.
//!
//! ## Submodules
//!
//! | File | Contents |
//! |------|----------|
//! | `internal_account.rs` | account get/set |
//! | `internal_stake.rs` | candidate pools, stake snapshots |
//! | `internal_split.rs` | split rules, stake reward distribution rules |
//! | `internal_contract.rs` | contract code and storage |
//! | `internal_state_root.rs` | Merkle state root |

mod internal_account;
mod internal_contract;
mod internal_split;
mod internal_stake;
mod internal_state_root;

pub use internal_split::{SplitContract, StakeRewardDistributionRule};
pub use internal_stake::StakeSnapshot;
pub(crate) use internal_state_root::merkle_root;

use std::collections::{BTreeMap, BTreeSet};

use scpt_common::{Address, Hash};
use scpt_storage::WriteBatch;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::stake::StakePurpose;

/// Prefix shared by every ledger key.
pub const LEDGER_PREFIX: &[u8] = b"ls/";

pub(crate) fn account_key(addr: &Address) -> Vec<u8> {
    format!("ls/a/{}", addr.to_hex()).into_bytes()
}

pub(crate) fn pool_key(purpose: StakePurpose) -> Vec<u8> {
    let tag = match purpose {
        StakePurpose::Validator => "vcp",
        StakePurpose::Guardian => "gcp",
        StakePurpose::EliteEdgeNode => "eenp",
    };
    format!("ls/ssc/{}", tag).into_bytes()
}

pub(crate) fn split_key(resource_id: &str) -> Vec<u8> {
    format!("ls/split/{}", hex::encode(resource_id.as_bytes())).into_bytes()
}

pub(crate) const SPLIT_PREFIX: &[u8] = b"ls/split/";
pub(crate) const SRD_PREFIX: &[u8] = b"ls/srd/";

pub(crate) fn srd_key(holder: &Address) -> Vec<u8> {
    format!("ls/srd/{}", holder.to_hex()).into_bytes()
}

pub(crate) fn code_key(hash: &Hash) -> Vec<u8> {
    format!("ls/code/{}", hash.to_hex()).into_bytes()
}

pub(crate) fn contract_storage_key(contract: &Address, key: &[u8]) -> Vec<u8> {
    format!("ls/st/{}/{}", contract.to_hex(), hex::encode(key)).into_bytes()
}

pub(crate) fn contract_storage_prefix(contract: &Address) -> Vec<u8> {
    format!("ls/st/{}/", contract.to_hex()).into_bytes()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreView {
    height: u64,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    dirty: BTreeSet<Vec<u8>>,
}

impl StoreView {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    /// View over entries loaded from storage; nothing is dirty.
    pub fn from_entries(height: u64, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            height,
            entries,
            dirty: BTreeSet::new(),
        }
    }

    /// Height of the last block applied to this view.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Height of the block whose transactions execute against this view.
    #[must_use]
    pub fn block_height(&self) -> u64 {
        self.height + 1
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_raw(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn set_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.dirty.insert(key.clone());
        self.entries.insert(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        if self.entries.remove(key).is_some() {
            self.dirty.insert(key.to_vec());
        }
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, key: &[u8]) -> LedgerResult<Option<T>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(bytes).map(Some).map_err(|e| {
                LedgerError::Internal(format!(
                    "corrupt state value at {}: {}",
                    String::from_utf8_lossy(key),
                    e
                ))
            }),
        }
    }

    pub(crate) fn set<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> LedgerResult<()> {
        let bytes = bincode::serialize(value).map_err(|e| LedgerError::Internal(e.to_string()))?;
        self.set_raw(key, bytes);
        Ok(())
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix_iter<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Every touched key since the view was loaded (or last marked clean),
    /// as puts for live keys and deletes for removed ones.
    pub fn write_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for key in &self.dirty {
            match self.entries.get(key) {
                Some(v) => batch.put(key.clone(), v.clone()),
                None => batch.delete(key.clone()),
            }
        }
        batch
    }

    #[must_use]
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// Raw entries in key order, for replay comparisons.
    pub fn entries(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_batch_tracks_puts_and_deletes() {
        let mut base = BTreeMap::new();
        base.insert(b"ls/a/01".to_vec(), vec![1]);
        base.insert(b"ls/a/02".to_vec(), vec![2]);
        let mut v = StoreView::from_entries(4, base);
        assert_eq!(v.write_batch().len(), 0);

        v.set_raw(b"ls/a/03".to_vec(), vec![3]);
        v.delete(b"ls/a/01");
        v.delete(b"ls/a/99");

        let ops: Vec<_> = v.write_batch().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(
            ops,
            vec![(b"ls/a/01".to_vec(), None), (b"ls/a/03".to_vec(), Some(vec![3]))]
        );
        v.mark_clean();
        assert_eq!(v.dirty_len(), 0);
    }

    #[test]
    fn prefix_iteration_stops_at_prefix_end() {
        let mut v = StoreView::new(0);
        v.set_raw(b"ls/split/aa".to_vec(), vec![1]);
        v.set_raw(b"ls/split/bb".to_vec(), vec![2]);
        v.set_raw(b"ls/srd/cc".to_vec(), vec![3]);
        assert_eq!(v.prefix_iter(SPLIT_PREFIX).count(), 2);
        assert_eq!(v.prefix_iter(SRD_PREFIX).count(), 1);
    }

    #[test]
    fn keys_are_hex_and_distinct_per_purpose() {
        let a = Address::from_bytes([0xab; 20]);
        assert_eq!(account_key(&a), format!("ls/a/{}", "ab".repeat(20)).into_bytes());
        assert_ne!(pool_key(StakePurpose::Guardian), pool_key(StakePurpose::EliteEdgeNode));
        assert_eq!(split_key("r/1"), b"ls/split/722f31".to_vec());
    }
}
