//! # SCPT Common
//!
//! Primitives shared by the ledger, validator, consensus and node crates.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `types` | `Address` (20 bytes), `Hash` (SHA3-512) |
//! | `crypto` | SHA3-512 helpers, Ed25519 `Keypair`, signature verification |
//! | `bls` | BLS12-381 keys, proof-of-possession, signature aggregation |
//! | `coin` | `Coins` dual-token balances, amount parsing |
//! | `heights` | activation heights, checkpoint helpers, height-gated parameters |

pub mod bls;
pub mod coin;
pub mod crypto;
pub mod heights;
pub mod types;

pub use bls::{aggregate_signatures, BlsError, BlsKeypair, BlsPublicKey, BlsSignature};
pub use coin::{parse_coin_amount, tokens, CoinError, Coins, WEI_PER_TOKEN};
pub use crypto::{
    address_from_pubkey_bytes, sha3_512, sha3_512_concat, verify_signature, CryptoError, Keypair,
};
pub use heights::{is_checkpoint_height, last_checkpoint_height, CHECKPOINT_INTERVAL};
pub use types::{Address, Hash, ParseError};

/// Default chain identifier.
pub const MAINNET_CHAIN_ID: &str = "scriptnet";

/// Re-exported so downstream crates name one BigInt type.
pub use num_bigint::BigInt;
