//! Hashing and Ed25519 helpers.
//!
//! Account and validator identities are Ed25519 keys; the address is the
//! first 20 bytes of SHA3-512(pubkey).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hex::{decode as hex_decode, encode as hex_encode};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_512};
use thiserror::Error;
use zeroize::Zeroize;

use crate::types::{Address, Hash, ADDRESS_LEN};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("hex decode error: {0}")]
    Hex(String),
}

/// compute sha3-512 raw bytes (64 bytes)
pub fn sha3_512_bytes(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// compute sha3-512 and return as Hash type
pub fn sha3_512(data: &[u8]) -> Hash {
    Hash::from_bytes(sha3_512_bytes(data))
}

/// Hash the concatenation of several byte slices without an intermediate buffer.
pub fn sha3_512_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_512::new();
    for p in parts {
        hasher.update(p);
    }
    Hash::from_bytes(hasher.finalize().into())
}

/// Derive an address from raw public key bytes.
pub fn address_from_pubkey_bytes(pubkey: &[u8]) -> Address {
    let digest = sha3_512_bytes(pubkey);
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest[..ADDRESS_LEN]);
    Address::from_bytes(out)
}

/// Verify an Ed25519 signature. Malformed keys or signatures verify as `false`.
pub fn verify_signature(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool {
    let Ok(pk_bytes) = <[u8; PUBLIC_KEY_LEN]>::try_from(pubkey) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(sig) else {
        return false;
    };
    vk.verify(msg, &sig).is_ok()
}

// ════════════════════════════════════════════════════════════════════════════
// KEYPAIR
// ════════════════════════════════════════════════════════════════════════════

/// Ed25519 signing identity. The secret is wiped on drop.
#[derive(Clone)]
pub struct Keypair {
    secret: [u8; SECRET_KEY_LEN],
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let signing = SigningKey::generate(&mut rng);
        Self {
            secret: signing.to_bytes(),
            signing,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; SECRET_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_LEN,
                found: bytes.len(),
            })?;
        Ok(Self {
            secret,
            signing: SigningKey::from_bytes(&secret),
        })
    }

    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = hex_decode(s).map_err(|e| CryptoError::Hex(e.to_string()))?;
        let kp = Self::from_secret_bytes(&bytes);
        bytes.zeroize();
        kp
    }

    /// Deterministic key for tests and local devnets.
    pub fn from_seed(seed: u8) -> Self {
        let secret = sha3_512_bytes(&[b'k', b'e', b'y', seed]);
        let mut raw = [0u8; SECRET_KEY_LEN];
        raw.copy_from_slice(&secret[..SECRET_KEY_LEN]);
        Self {
            secret: raw,
            signing: SigningKey::from_bytes(&raw),
        }
    }

    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing.verifying_key().to_bytes().to_vec()
    }

    #[must_use]
    pub fn address(&self) -> Address {
        address_from_pubkey_bytes(&self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_bytes().to_vec()
    }

    pub fn secret_hex(&self) -> String {
        hex_encode(self.secret)
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"hello");
        assert!(verify_signature(&kp.public_key_bytes(), b"hello", &sig));
        assert!(!verify_signature(&kp.public_key_bytes(), b"hellO", &sig));
    }

    #[test]
    fn malformed_inputs_do_not_verify() {
        let kp = Keypair::from_seed(1);
        assert!(!verify_signature(&[1, 2, 3], b"m", &kp.sign(b"m")));
        assert!(!verify_signature(&kp.public_key_bytes(), b"m", &[0u8; 10]));
    }

    #[test]
    fn seeded_keys_are_stable() {
        assert_eq!(Keypair::from_seed(7).address(), Keypair::from_seed(7).address());
        assert_ne!(Keypair::from_seed(7).address(), Keypair::from_seed(8).address());
    }

    #[test]
    fn secret_hex_roundtrip_preserves_address() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(restored.address(), kp.address());
    }

    #[test]
    fn address_is_prefix_of_pubkey_digest() {
        let kp = Keypair::from_seed(3);
        let digest = sha3_512_bytes(&kp.public_key_bytes());
        assert_eq!(&kp.address().as_bytes()[..], &digest[..20]);
    }
}
