use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{KvStore, StoreError, WriteBatch};

/// Per-key version history: height -> value (`None` = deleted at that height).
type Versions = BTreeMap<u64, Option<Vec<u8>>>;

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    versions: BTreeMap<Vec<u8>, Versions>,
    meta: BTreeMap<Vec<u8>, Vec<u8>>,
    latest: Option<u64>,
}

impl Inner {
    fn check_height(&self, height: u64) -> Result<(), StoreError> {
        match self.latest {
            Some(latest) if height <= latest => Ok(()),
            latest => Err(StoreError::HeightNotCommitted {
                requested: height,
                latest,
            }),
        }
    }

    fn value_at(versions: &Versions, height: u64) -> Option<&Vec<u8>> {
        versions
            .range(..=height)
            .next_back()
            .and_then(|(_, v)| v.as_ref())
    }
}

/// In-memory versioned store with optional file persistence.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            path: None,
        }
    }

    /// Open a store persisted at `path`, loading the existing image if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let data = fs::read(&path)?;
            let inner: Inner =
                bincode::deserialize(&data).map_err(|e| StoreError::Encoding(e.to_string()))?;
            info!(path = %path.display(), latest = ?inner.latest, "loaded store image");
            inner
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Inner::default()
        };
        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
        })
    }

    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = bincode::serialize(inner).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read();
        let Some(latest) = inner.latest else {
            return Ok(None);
        };
        Ok(inner
            .versions
            .get(key)
            .and_then(|v| Inner::value_at(v, latest))
            .cloned())
    }

    fn get_at(&self, key: &[u8], height: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read();
        inner.check_height(height)?;
        Ok(inner
            .versions
            .get(key)
            .and_then(|v| Inner::value_at(v, height))
            .cloned())
    }

    fn scan_at(
        &self,
        prefix: &[u8],
        height: u64,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError> {
        let inner = self.inner.read();
        inner.check_height(height)?;
        let mut out = BTreeMap::new();
        for (key, versions) in inner.versions.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(v) = Inner::value_at(versions, height) {
                out.insert(key.clone(), v.clone());
            }
        }
        Ok(out)
    }

    fn commit(&self, height: u64, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(latest) = inner.latest {
            if height <= latest {
                return Err(StoreError::NonMonotonicCommit { height, latest });
            }
        }
        let n = batch.len();
        for (key, value) in batch.into_ops() {
            inner.versions.entry(key).or_default().insert(height, value);
        }
        inner.latest = Some(height);
        self.persist(&inner)?;
        debug!(height, writes = n, "committed batch");
        Ok(())
    }

    fn latest_height(&self) -> Option<u64> {
        self.inner.read().latest
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().meta.get(key).cloned())
    }

    fn put_meta(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.meta.insert(key.to_vec(), value);
        self.persist(&inner)
    }

    fn delete_meta(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.meta.remove(key);
        self.persist(&inner)
    }
}
