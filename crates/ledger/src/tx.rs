//! Transaction types, canonical encoding, signing and id helpers.
//!
//! `Tx` is a closed set of variants. Every variant names its signing
//! inputs (`TxInput`), whose signatures cover
//! `bincode((chain_id, tx with all input signatures cleared))`. The tx id
//! is `sha3-512(bincode((chain_id, tx)))`, so it commits to signatures too.

use num_bigint::BigInt;
use scpt_common::coin::bigint_string;
use scpt_common::{sha3_512, verify_signature, Address, BlsPublicKey, BlsSignature, Coins, Hash, Keypair};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::stake::StakePurpose;

// ════════════════════════════════════════════════════════════════════════════
// BUILDING BLOCKS
// ════════════════════════════════════════════════════════════════════════════

/// A signing, debited party of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: Address,
    pub coins: Coins,
    pub sequence: u64,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl TxInput {
    pub fn new(address: Address, coins: Coins, sequence: u64) -> Self {
        Self {
            address,
            coins,
            sequence,
            pubkey: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Verify the signature against `sign_bytes` and check the pubkey owns the address.
    pub fn verify(&self, sign_bytes: &[u8]) -> bool {
        if self.pubkey.is_empty() || self.signature.is_empty() {
            return false;
        }
        scpt_common::address_from_pubkey_bytes(&self.pubkey) == self.address
            && verify_signature(&self.pubkey, sign_bytes, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub coins: Coins,
}

impl TxOutput {
    pub fn new(address: Address, coins: Coins) -> Self {
        Self { address, coins }
    }
}

/// One entry of a split-rule payout table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub address: Address,
    pub percentage: u32,
}

/// Ed25519 signature by a stake holder over the source address, proving
/// the holder consents to receiving the stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderSignature {
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl HolderSignature {
    pub fn sign(holder: &Keypair, source: &Address) -> Self {
        Self {
            pubkey: holder.public_key_bytes(),
            signature: holder.sign(source.as_bytes()),
        }
    }

    pub fn verify(&self, holder: &Address, source: &Address) -> bool {
        scpt_common::address_from_pubkey_bytes(&self.pubkey) == *holder
            && verify_signature(&self.pubkey, source.as_bytes(), &self.signature)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PAYLOADS
// ════════════════════════════════════════════════════════════════════════════

/// Transfer. Also the body of `Tx::EdgeStake`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTx {
    pub fee: Coins,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositStakeTx {
    pub fee: Coins,
    pub source: TxInput,
    pub holder: TxOutput,
    pub purpose: StakePurpose,
    pub bls_pubkey: Option<BlsPublicKey>,
    pub bls_pop: Option<BlsSignature>,
    pub holder_sig: Option<HolderSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStakeTx {
    pub fee: Coins,
    pub source: TxInput,
    pub holder: TxOutput,
    pub purpose: StakePurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveFundTx {
    pub fee: Coins,
    /// `source.coins` is the reserved fund.
    pub source: TxInput,
    pub collateral: Coins,
    pub resource_ids: Vec<String>,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFundTx {
    pub fee: Coins,
    pub source: TxInput,
    pub reserve_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRuleTx {
    pub fee: Coins,
    pub resource_id: String,
    pub initiator: TxInput,
    pub splits: Vec<Split>,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardDistributionTx {
    pub fee: Coins,
    pub holder: TxInput,
    pub beneficiary: TxOutput,
    pub split_basis_point: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartContractTx {
    /// `from.coins` is the value sent to the contract.
    pub from: TxInput,
    /// The zero address deploys `data` as new contract code.
    pub to: TxOutput,
    pub gas_limit: u64,
    #[serde(with = "bigint_string")]
    pub gas_price: BigInt,
    pub data: Vec<u8>,
}

// ════════════════════════════════════════════════════════════════════════════
// TX
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tx {
    Send(SendTx),
    EdgeStake(SendTx),
    DepositStake(DepositStakeTx),
    WithdrawStake(WithdrawStakeTx),
    ReserveFund(ReserveFundTx),
    ReleaseFund(ReleaseFundTx),
    SplitRule(SplitRuleTx),
    StakeRewardDistribution(StakeRewardDistributionTx),
    SmartContract(SmartContractTx),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    Send,
    EdgeStake,
    DepositStake,
    WithdrawStake,
    ReserveFund,
    ReleaseFund,
    SplitRule,
    StakeRewardDistribution,
    SmartContract,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Send => "send",
            TxKind::EdgeStake => "edge_stake",
            TxKind::DepositStake => "deposit_stake",
            TxKind::WithdrawStake => "withdraw_stake",
            TxKind::ReserveFund => "reserve_fund",
            TxKind::ReleaseFund => "release_fund",
            TxKind::SplitRule => "split_rule",
            TxKind::StakeRewardDistribution => "stake_reward_distribution",
            TxKind::SmartContract => "smart_contract",
        }
    }
}

impl Tx {
    #[must_use]
    pub fn kind(&self) -> TxKind {
        match self {
            Tx::Send(_) => TxKind::Send,
            Tx::EdgeStake(_) => TxKind::EdgeStake,
            Tx::DepositStake(_) => TxKind::DepositStake,
            Tx::WithdrawStake(_) => TxKind::WithdrawStake,
            Tx::ReserveFund(_) => TxKind::ReserveFund,
            Tx::ReleaseFund(_) => TxKind::ReleaseFund,
            Tx::SplitRule(_) => TxKind::SplitRule,
            Tx::StakeRewardDistribution(_) => TxKind::StakeRewardDistribution,
            Tx::SmartContract(_) => TxKind::SmartContract,
        }
    }

    /// Declared fee. Contract calls pay per gas instead and report zero here.
    pub fn fee(&self) -> Coins {
        match self {
            Tx::Send(t) | Tx::EdgeStake(t) => t.fee.clone(),
            Tx::DepositStake(t) => t.fee.clone(),
            Tx::WithdrawStake(t) => t.fee.clone(),
            Tx::ReserveFund(t) => t.fee.clone(),
            Tx::ReleaseFund(t) => t.fee.clone(),
            Tx::SplitRule(t) => t.fee.clone(),
            Tx::StakeRewardDistribution(t) => t.fee.clone(),
            Tx::SmartContract(_) => Coins::zero(),
        }
    }

    pub fn inputs(&self) -> Vec<&TxInput> {
        match self {
            Tx::Send(t) | Tx::EdgeStake(t) => t.inputs.iter().collect(),
            Tx::DepositStake(t) => vec![&t.source],
            Tx::WithdrawStake(t) => vec![&t.source],
            Tx::ReserveFund(t) => vec![&t.source],
            Tx::ReleaseFund(t) => vec![&t.source],
            Tx::SplitRule(t) => vec![&t.initiator],
            Tx::StakeRewardDistribution(t) => vec![&t.holder],
            Tx::SmartContract(t) => vec![&t.from],
        }
    }

    fn inputs_mut(&mut self) -> Vec<&mut TxInput> {
        match self {
            Tx::Send(t) | Tx::EdgeStake(t) => t.inputs.iter_mut().collect(),
            Tx::DepositStake(t) => vec![&mut t.source],
            Tx::WithdrawStake(t) => vec![&mut t.source],
            Tx::ReserveFund(t) => vec![&mut t.source],
            Tx::ReleaseFund(t) => vec![&mut t.source],
            Tx::SplitRule(t) => vec![&mut t.initiator],
            Tx::StakeRewardDistribution(t) => vec![&mut t.holder],
            Tx::SmartContract(t) => vec![&mut t.from],
        }
    }

    /// First signer and its sequence; the mempool dedups on this pair.
    pub fn primary_signer(&self) -> Option<(Address, u64)> {
        self.inputs().first().map(|i| (i.address, i.sequence))
    }

    /// Payload covered by every input signature.
    pub fn sign_bytes(&self, chain_id: &str) -> LedgerResult<Vec<u8>> {
        let mut unsigned = self.clone();
        for input in unsigned.inputs_mut() {
            input.signature.clear();
        }
        bincode::serialize(&(chain_id, &unsigned)).map_err(|e| LedgerError::Internal(e.to_string()))
    }

    pub fn tx_id(&self, chain_id: &str) -> LedgerResult<Hash> {
        let bytes = bincode::serialize(&(chain_id, self))
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        Ok(sha3_512(&bytes))
    }

    /// Fill pubkeys and signatures for every input using the matching keypair.
    pub fn sign(&mut self, chain_id: &str, keys: &[&Keypair]) -> LedgerResult<()> {
        for input in self.inputs_mut() {
            let key = keys
                .iter()
                .find(|k| k.address() == input.address)
                .ok_or_else(|| {
                    LedgerError::Malformed(format!("no key for input {}", input.address))
                })?;
            input.pubkey = key.public_key_bytes();
        }
        let payload = self.sign_bytes(chain_id)?;
        for input in self.inputs_mut() {
            if let Some(key) = keys.iter().find(|k| k.address() == input.address) {
                input.signature = key.sign(&payload);
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> LedgerResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::Internal(e.to_string()))
    }

    pub fn from_bytes(raw: &[u8]) -> LedgerResult<Self> {
        bincode::deserialize(raw).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}
