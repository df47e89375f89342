//! Node key file: the Ed25519 signing key and, for checkpoint committee
//! members, the BLS key material.
//!
//! ```json
//! { "address": "…", "secret_key": "<ed25519 hex>", "bls_ikm": "<hex>" }
//! ```
//!
//! `address` is informational; it is checked against the secret on load.

use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use scpt_common::{Address, BlsKeypair, BlsPublicKey, Keypair};

use crate::error::{NodeError, NodeResult};

const BLS_IKM_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    address: Address,
    secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bls_ikm: Option<String>,
}

pub struct NodeKey {
    pub keypair: Keypair,
    pub bls: Option<BlsKeypair>,
    bls_ikm: Option<Zeroizing<Vec<u8>>>,
}

impl NodeKey {
    /// Fresh random keys. `with_bls` adds a BLS key for committee duty.
    pub fn generate(with_bls: bool) -> NodeResult<Self> {
        let keypair = Keypair::generate();
        if !with_bls {
            return Ok(Self::new(keypair, None));
        }
        let mut ikm = Zeroizing::new(vec![0u8; BLS_IKM_LEN]);
        rand::thread_rng().fill_bytes(&mut ikm);
        let bls = BlsKeypair::from_ikm(&ikm)?;
        Ok(Self {
            keypair,
            bls: Some(bls),
            bls_ikm: Some(ikm),
        })
    }

    /// Keys supplied by the caller. A key built this way cannot be saved
    /// with its BLS part.
    pub fn new(keypair: Keypair, bls: Option<BlsKeypair>) -> Self {
        Self {
            keypair,
            bls,
            bls_ikm: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    #[must_use]
    pub fn bls_public_key(&self) -> Option<BlsPublicKey> {
        self.bls.as_ref().map(BlsKeypair::public_key)
    }

    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let raw = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            NodeError::Key(format!("cannot read {}: {}", path.display(), e))
        })?);
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| NodeError::Key(format!("{}: {}", path.display(), e)))?;
        let secret = Zeroizing::new(file.secret_key);
        let keypair = Keypair::from_secret_hex(&secret)?;
        if keypair.address() != file.address {
            return Err(NodeError::Key(format!(
                "{}: address {} does not match secret key ({})",
                path.display(),
                file.address,
                keypair.address()
            )));
        }
        let (bls, bls_ikm) = match file.bls_ikm.map(Zeroizing::new) {
            None => (None, None),
            Some(hex_ikm) => {
                let ikm = Zeroizing::new(
                    hex::decode(hex_ikm.as_str())
                        .map_err(|e| NodeError::Key(format!("bls_ikm: {}", e)))?,
                );
                (Some(BlsKeypair::from_ikm(&ikm)?), Some(ikm))
            }
        };
        Ok(Self {
            keypair,
            bls,
            bls_ikm,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> NodeResult<()> {
        let path = path.as_ref();
        if self.bls.is_some() && self.bls_ikm.is_none() {
            return Err(NodeError::Key("BLS key material is not exportable".into()));
        }
        let file = KeyFile {
            address: self.address(),
            secret_key: self.keypair.secret_hex(),
            bls_ikm: self.bls_ikm.as_ref().map(|ikm| hex::encode(ikm.as_slice())),
        };
        let raw = Zeroizing::new(
            serde_json::to_string_pretty(&file).map_err(|e| NodeError::Key(e.to_string()))?,
        );
        drop(Zeroizing::new(file.secret_key));
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, raw.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey")
            .field("address", &self.address())
            .field("bls", &self.bls_public_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_key_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("node_key.json");
        let key = NodeKey::generate(true).unwrap();
        key.save(&path).unwrap();

        let loaded = NodeKey::load(&path).unwrap();
        assert_eq!(loaded.address(), key.address());
        assert_eq!(loaded.bls_public_key(), key.bls_public_key());
        assert!(loaded.bls_public_key().is_some());
    }

    #[test]
    fn key_without_bls_omits_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.json");
        NodeKey::generate(false).unwrap().save(&path).unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("bls_ikm"));
        assert!(NodeKey::load(&path).unwrap().bls.is_none());
    }

    #[test]
    fn mismatched_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.json");
        let key = NodeKey::generate(false).unwrap();
        let forged = serde_json::json!({
            "address": Keypair::from_seed(9).address(),
            "secret_key": key.keypair.secret_hex(),
        });
        std::fs::write(&path, forged.to_string()).unwrap();
        assert!(matches!(NodeKey::load(&path), Err(NodeError::Key(_))));
    }
}
