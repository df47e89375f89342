//! Genesis document.
//!
//! A JSON file naming the chain id, the initial balances and the initial
//! stakes. Building it yields the height-0 [`StoreView`]; every node that
//! loads the same document gets the same genesis state root.
//!
//! ```json
//! {
//!   "chain_id": "scriptnet",
//!   "accounts": [{ "address": "…", "coins": { "scptwei": "…", "spaywei": "…" } }],
//!   "stakes": [{ "source": "…", "holder": "…", "amount": "…", "purpose": "Validator" }]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use num_bigint::BigInt;
use num_traits::Signed;
use scpt_common::coin::bigint_string;
use scpt_common::{Address, BlsPublicKey, Coins};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::Account;
use crate::error::LedgerError;
use crate::stake::{CandidatePool, StakePurpose};
use crate::state::StoreView;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("cannot read genesis file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse genesis: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid genesis: {0}")]
    Invalid(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub coins: Coins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisStake {
    pub source: Address,
    pub holder: Address,
    #[serde(with = "bigint_string")]
    pub amount: BigInt,
    pub purpose: StakePurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bls_pubkey: Option<BlsPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: String,
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
    #[serde(default)]
    pub stakes: Vec<GenesisStake>,
}

impl Genesis {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenesisError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, GenesisError> {
        let genesis: Genesis = serde_json::from_str(raw)?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn to_json_pretty(&self) -> Result<String, GenesisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() {
            return Err(GenesisError::Invalid("empty chain id".into()));
        }
        let mut seen = BTreeSet::new();
        for acc in &self.accounts {
            if acc.address.is_zero() {
                return Err(GenesisError::Invalid("zero account address".into()));
            }
            if !seen.insert(acc.address) {
                return Err(GenesisError::Invalid(format!(
                    "duplicate account {}",
                    acc.address
                )));
            }
            if !acc.coins.is_valid() {
                return Err(GenesisError::Invalid(format!(
                    "negative balance for {}",
                    acc.address
                )));
            }
        }
        for stake in &self.stakes {
            if !stake.amount.is_positive() {
                return Err(GenesisError::Invalid(format!(
                    "non-positive stake from {} to {}",
                    stake.source, stake.holder
                )));
            }
            if stake.purpose.requires_bls() && stake.bls_pubkey.is_none() {
                return Err(GenesisError::Invalid(format!(
                    "{} stake to {} has no BLS key",
                    stake.purpose.as_str(),
                    stake.holder
                )));
            }
        }
        Ok(())
    }

    /// Height-0 state described by this document.
    pub fn build_view(&self) -> Result<StoreView, GenesisError> {
        self.validate()?;
        let mut view = StoreView::new(0);
        for acc in &self.accounts {
            let mut account = Account::new(acc.address);
            account.balance = acc.coins.clone();
            view.set_account(&account)?;
        }
        for purpose in StakePurpose::ALL {
            let mut pool = CandidatePool::new(purpose);
            for stake in self.stakes.iter().filter(|s| s.purpose == purpose) {
                pool.deposit_stake(stake.source, stake.holder, stake.amount.clone(), stake.bls_pubkey)?;
            }
            if !pool.holders.is_empty() {
                view.set_candidate_pool(&pool)?;
            }
        }
        Ok(view)
    }
}
