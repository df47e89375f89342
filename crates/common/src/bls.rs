//! BLS12-381 keys and signatures for checkpoint attestation.
//!
//! Uses the `min_pk` variant (48-byte public keys, 96-byte signatures) so
//! that many committee signatures over the same checkpoint hash aggregate
//! into one 96-byte signature verified against the signers' public keys.
//!
//! Proof-of-possession (a signature over the public key itself under a
//! separate domain tag) is required before a key is admitted into a
//! committee; this rules out rogue-key attacks on the aggregate.

use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use hex::{decode as hex_decode, encode as hex_encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::sha3_512_bytes;

pub const BLS_PUBKEY_LEN: usize = 48;
pub const BLS_SIGNATURE_LEN: usize = 96;

const SIG_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
const POP_DST: &[u8] = b"BLS_POP_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlsError {
    #[error("invalid bls public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid bls signature: {0}")]
    InvalidSignature(String),

    #[error("invalid bls secret key: {0}")]
    InvalidSecretKey(String),

    #[error("cannot aggregate an empty signature set")]
    EmptyAggregate,

    #[error("aggregation failed: {0}")]
    Aggregation(String),
}

fn describe(e: BLST_ERROR) -> String {
    format!("{:?}", e)
}

macro_rules! hex_bytes_newtype {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex_encode(self.0)
            }

            pub fn from_slice(b: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = b.try_into().ok()?;
                Some(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&hex_encode(&self.0[..8]))
                    .finish()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let s = s.strip_prefix("0x").unwrap_or(&s);
                let bytes = hex_decode(s).map_err(serde::de::Error::custom)?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ))
                })
            }
        }
    };
}

hex_bytes_newtype!(BlsPublicKey, BLS_PUBKEY_LEN);
hex_bytes_newtype!(BlsSignature, BLS_SIGNATURE_LEN);

impl BlsPublicKey {
    fn decode(&self) -> Result<PublicKey, BlsError> {
        PublicKey::key_validate(&self.0).map_err(|e| BlsError::InvalidPublicKey(describe(e)))
    }

    /// Check the proof-of-possession produced by [`BlsKeypair::proof_of_possession`].
    pub fn verify_pop(&self, pop: &BlsSignature) -> bool {
        let Ok(pk) = self.decode() else {
            return false;
        };
        let Ok(sig) = Signature::from_bytes(&pop.0) else {
            return false;
        };
        sig.verify(true, &self.0, POP_DST, &[], &pk, false) == BLST_ERROR::BLST_SUCCESS
    }
}

impl BlsSignature {
    fn decode(&self) -> Result<Signature, BlsError> {
        Signature::from_bytes(&self.0).map_err(|e| BlsError::InvalidSignature(describe(e)))
    }

    /// Verify a single-signer signature over `msg`.
    pub fn verify(&self, msg: &[u8], pubkey: &BlsPublicKey) -> bool {
        let (Ok(sig), Ok(pk)) = (self.decode(), pubkey.decode()) else {
            return false;
        };
        sig.verify(true, msg, SIG_DST, &[], &pk, false) == BLST_ERROR::BLST_SUCCESS
    }

    /// Verify an aggregate signature where every signer signed the same `msg`.
    /// Only sound for keys whose proof-of-possession was checked on admission.
    pub fn verify_aggregate(&self, msg: &[u8], pubkeys: &[BlsPublicKey]) -> bool {
        if pubkeys.is_empty() {
            return false;
        }
        let Ok(sig) = self.decode() else {
            return false;
        };
        let mut decoded = Vec::with_capacity(pubkeys.len());
        for pk in pubkeys {
            match pk.decode() {
                Ok(p) => decoded.push(p),
                Err(_) => return false,
            }
        }
        let refs: Vec<&PublicKey> = decoded.iter().collect();
        sig.fast_aggregate_verify(true, msg, SIG_DST, &refs) == BLST_ERROR::BLST_SUCCESS
    }
}

/// Aggregate signatures over the same message into one.
pub fn aggregate_signatures(sigs: &[BlsSignature]) -> Result<BlsSignature, BlsError> {
    if sigs.is_empty() {
        return Err(BlsError::EmptyAggregate);
    }
    let decoded = sigs
        .iter()
        .map(BlsSignature::decode)
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&Signature> = decoded.iter().collect();
    let agg = AggregateSignature::aggregate(&refs, true)
        .map_err(|e| BlsError::Aggregation(describe(e)))?;
    Ok(BlsSignature(agg.to_signature().to_bytes()))
}

// ════════════════════════════════════════════════════════════════════════════
// KEYPAIR
// ════════════════════════════════════════════════════════════════════════════

pub struct BlsKeypair {
    secret: SecretKey,
    public: BlsPublicKey,
}

impl BlsKeypair {
    /// Derive a keypair from input key material (at least 32 bytes).
    pub fn from_ikm(ikm: &[u8]) -> Result<Self, BlsError> {
        let secret =
            SecretKey::key_gen(ikm, &[]).map_err(|e| BlsError::InvalidSecretKey(describe(e)))?;
        let public = BlsPublicKey(secret.sk_to_pk().to_bytes());
        Ok(Self { secret, public })
    }

    /// Deterministic keypair bound to an arbitrary seed, used for devnets and tests.
    pub fn from_seed(seed: &[u8]) -> Result<Self, BlsError> {
        let mut ikm = sha3_512_bytes(seed);
        let kp = Self::from_ikm(&ikm);
        ikm.zeroize();
        kp
    }

    #[must_use]
    pub fn public_key(&self) -> BlsPublicKey {
        self.public
    }

    pub fn sign(&self, msg: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(msg, SIG_DST, &[]).to_bytes())
    }

    pub fn proof_of_possession(&self) -> BlsSignature {
        BlsSignature(self.secret.sign(&self.public.0, POP_DST, &[]).to_bytes())
    }
}

impl fmt::Debug for BlsKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlsKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
