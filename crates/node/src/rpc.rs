//! Query and submission surface.
//!
//! `RpcService` is transport-agnostic: every method takes typed params and
//! returns a `serde`-serializable result, so any JSON-RPC or HTTP front end
//! can be layered on top. Reads go against the last committed ledger view
//! and never block the consensus authority.
//!
//! | Method | Result |
//! |--------|--------|
//! | `get_account` | [`Account`] at the head or a past height |
//! | `get_status` | [`StatusResult`] |
//! | `broadcast_raw_transaction` | [`BroadcastResult`], after finalization |
//! | `broadcast_raw_transaction_async` | [`BroadcastAsyncResult`], after admission |
//! | `get_committee_info_by_height` | guardians of the checkpoint committee |
//! | `get_eenp_by_height` | elite edge nodes of the checkpoint committee |
//! | `get_stake_by_source_and_holder` | one [`Stake`] |
//! | `get_stake_reward_distribution_by_height` | [`StakeRewardDistributionRule`] |
//! | `get_checkpoint_attestation_by_height` | [`CheckpointAttestation`] |
//! | `call_smart_contract` | [`CallResult`], dry run |

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use scpt_common::heights::minimum_gas_price;
use scpt_common::{Address, Coins, Hash};
use scpt_consensus::{
    CheckpointAttestation, ConsensusError, ConsensusMessage, ConsensusStatus, ConsensusStore,
    DataResponse, FinalizedBlock, Network, Phase,
};
use scpt_ledger::{
    Account, ErrorCode, Ledger, LedgerError, Mempool, MempoolError, SmartContractTx, Stake,
    StakePurpose, StakeRewardDistributionRule, TxInput, TxOutput,
};
use scpt_validator::{CommitteeMember, ValidatorError, ValidatorManager};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Refused by the mempool admission gate. `code` is the stable ledger
    /// error code; `retryable` tells clients whether resubmitting can help.
    #[error("transaction rejected ({code:?}): {message}")]
    TxRejected {
        code: ErrorCode,
        retryable: bool,
        message: String,
    },

    #[error("transaction {0} not finalized before timeout")]
    Timeout(Hash),

    #[error("node is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for RpcError {
    fn from(e: LedgerError) -> Self {
        RpcError::Internal(e.to_string())
    }
}

impl From<ConsensusError> for RpcError {
    fn from(e: ConsensusError) -> Self {
        RpcError::Internal(e.to_string())
    }
}

impl From<ValidatorError> for RpcError {
    fn from(e: ValidatorError) -> Self {
        RpcError::NotFound(e.to_string())
    }
}

impl From<MempoolError> for RpcError {
    fn from(e: MempoolError) -> Self {
        let retryable = match &e {
            MempoolError::Full(_) => true,
            MempoolError::Duplicate(_) | MempoolError::DuplicateSequence { .. } => false,
            MempoolError::Rejected(inner) => inner.is_retryable(),
        };
        RpcError::TxRejected {
            code: e.code(),
            retryable,
            message: e.to_string(),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

// ════════════════════════════════════════════════════════════════════════════
// RESULTS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub chain_id: String,
    pub address: Address,
    pub latest_finalized_height: u64,
    pub latest_finalized_hash: Hash,
    pub highest_cc_height: u64,
    pub current_height: u64,
    pub current_round: u32,
    pub phase: Phase,
    pub syncing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub hash: Hash,
    pub block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastAsyncResult {
    pub hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeInfo {
    pub height: u64,
    pub checkpoint_height: u64,
    pub members: Vec<CommitteeMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub gas_used: u64,
    /// Hex-encoded return data.
    pub output: String,
    pub reverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// SERVICE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RpcService {
    chain_id: String,
    address: Address,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    validators: Arc<ValidatorManager>,
    consensus: ConsensusStore,
    status: Arc<RwLock<ConsensusStatus>>,
    finalized: broadcast::Sender<FinalizedBlock>,
    network: Arc<dyn Network>,
    tx_timeout: Duration,
}

impl RpcService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: impl Into<String>,
        address: Address,
        ledger: Arc<Ledger>,
        mempool: Arc<Mempool>,
        validators: Arc<ValidatorManager>,
        consensus: ConsensusStore,
        status: Arc<RwLock<ConsensusStatus>>,
        finalized: broadcast::Sender<FinalizedBlock>,
        network: Arc<dyn Network>,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            address,
            ledger,
            mempool,
            validators,
            consensus,
            status,
            finalized,
            network,
            tx_timeout,
        }
    }

    /// Account at the committed head, or as of `height`.
    pub fn get_account(&self, address: &str, height: Option<u64>) -> RpcResult<Account> {
        let address = parse_address(address)?;
        let account = match height {
            None => self.ledger.account(&address)?,
            Some(h) => {
                self.check_committed(h)?;
                self.ledger.account_at(&address, h)?
            }
        };
        account.ok_or_else(|| RpcError::NotFound(format!("account {}", address)))
    }

    pub fn get_status(&self) -> RpcResult<StatusResult> {
        let head = self.ledger.head()?;
        let status = self.status.read().clone();
        Ok(StatusResult {
            chain_id: self.chain_id.clone(),
            address: self.address,
            latest_finalized_height: head.height,
            latest_finalized_hash: head.hash(),
            highest_cc_height: status.highest_cc.map_or(0, |r| r.height),
            current_height: status.height,
            current_round: status.round,
            phase: status.phase,
            syncing: false,
        })
    }

    /// Admit `raw_hex`, gossip it, and wait until a finalized block
    /// includes it.
    pub async fn broadcast_raw_transaction(&self, raw_hex: &str) -> RpcResult<BroadcastResult> {
        // subscribe before admission so the including block cannot be missed
        let mut finalized = self.finalized.subscribe();
        let hash = self.submit(raw_hex).await?;
        let wait = async {
            loop {
                match finalized.recv().await {
                    Ok(record) => {
                        let included = record
                            .block
                            .txs
                            .iter()
                            .any(|tx| tx.tx_id(&self.chain_id).is_ok_and(|id| id == hash));
                        if included {
                            return Ok(record.block.height());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "rpc lagged behind finalization events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(RpcError::Shutdown),
                }
            }
        };
        match tokio::time::timeout(self.tx_timeout, wait).await {
            Ok(Ok(block_height)) => Ok(BroadcastResult { hash, block_height }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RpcError::Timeout(hash)),
        }
    }

    /// Admit `raw_hex` and gossip it; returns once admitted.
    pub async fn broadcast_raw_transaction_async(&self, raw_hex: &str) -> RpcResult<BroadcastAsyncResult> {
        let hash = self.submit(raw_hex).await?;
        Ok(BroadcastAsyncResult { hash })
    }

    async fn submit(&self, raw_hex: &str) -> RpcResult<Hash> {
        let raw = hex::decode(raw_hex.trim().trim_start_matches("0x"))
            .map_err(|e| RpcError::InvalidParams(format!("transaction hex: {}", e)))?;
        let hash = self.mempool.insert(&raw)?;
        info!(tx = %hash.short(), "transaction admitted");
        let gossip = ConsensusMessage::DataResponse(Box::new(DataResponse::Txs(vec![raw])));
        if let Err(e) = self.network.broadcast(gossip).await {
            debug!(tx = %hash.short(), error = %e, "transaction gossip failed");
        }
        Ok(hash)
    }

    /// Guardians of the committee responsible for `height`.
    pub fn get_committee_info_by_height(&self, height: u64) -> RpcResult<CommitteeInfo> {
        self.committee_of(height, StakePurpose::Guardian)
    }

    /// Elite edge nodes of the committee responsible for `height`.
    pub fn get_eenp_by_height(&self, height: u64) -> RpcResult<CommitteeInfo> {
        self.committee_of(height, StakePurpose::EliteEdgeNode)
    }

    fn committee_of(&self, height: u64, purpose: StakePurpose) -> RpcResult<CommitteeInfo> {
        self.check_committed(height)?;
        let committee = self.validators.committee_for_height(height)?;
        Ok(CommitteeInfo {
            height,
            checkpoint_height: committee.checkpoint_height(),
            members: committee.members_of(purpose).cloned().collect(),
        })
    }

    pub fn get_stake_by_source_and_holder(
        &self,
        source: &str,
        holder: &str,
        purpose: StakePurpose,
    ) -> RpcResult<Stake> {
        let source = parse_address(source)?;
        let holder = parse_address(holder)?;
        let height = self.ledger.head()?.height;
        let snapshot = self.ledger.stake_snapshot_at(height)?;
        snapshot
            .pool(purpose)
            .holder(&holder)
            .and_then(|h| h.stake_from(&source))
            .cloned()
            .ok_or_else(|| {
                RpcError::NotFound(format!(
                    "{} stake from {} to {}",
                    purpose.as_str(),
                    source,
                    holder
                ))
            })
    }

    pub fn get_stake_reward_distribution_by_height(
        &self,
        height: u64,
        holder: &str,
    ) -> RpcResult<StakeRewardDistributionRule> {
        let holder = parse_address(holder)?;
        self.check_committed(height)?;
        self.ledger
            .srd_rule_at(&holder, height)?
            .ok_or_else(|| RpcError::NotFound(format!("distribution rule of {} at {}", holder, height)))
    }

    pub fn get_checkpoint_attestation_by_height(&self, height: u64) -> RpcResult<CheckpointAttestation> {
        self.consensus
            .attestation_at(height)?
            .ok_or_else(|| RpcError::NotFound(format!("checkpoint attestation at {}", height)))
    }

    /// Execute a contract call against a scratch copy of the committed
    /// state. Nothing is persisted.
    pub fn call_smart_contract(
        &self,
        from: &str,
        to: &str,
        data_hex: &str,
        gas_limit: u64,
    ) -> RpcResult<CallResult> {
        let from = parse_address(from)?;
        let to = parse_address(to)?;
        let data = hex::decode(data_hex.trim().trim_start_matches("0x"))
            .map_err(|e| RpcError::InvalidParams(format!("data hex: {}", e)))?;
        let head = self.ledger.head()?;
        let sequence = self
            .ledger
            .account(&from)?
            .map_or(1, |a| a.sequence + 1);
        let tx = SmartContractTx {
            from: TxInput::new(from, Coins::zero(), sequence),
            to: TxOutput::new(to, Coins::zero()),
            gas_limit,
            gas_price: minimum_gas_price(head.height + 1),
            data,
        };
        let outcome = self.ledger.call_smart_contract(&tx)?;
        Ok(CallResult {
            gas_used: outcome.gas_used,
            output: hex::encode(&outcome.output),
            reverted: outcome.reverted,
            error: outcome.error,
        })
    }

    fn check_committed(&self, height: u64) -> RpcResult<()> {
        let head = self.ledger.head()?.height;
        if height > head {
            return Err(RpcError::NotFound(format!(
                "height {} not committed (head {})",
                height, head
            )));
        }
        Ok(())
    }
}

fn parse_address(s: &str) -> RpcResult<Address> {
    s.trim()
        .parse()
        .map_err(|e| RpcError::InvalidParams(format!("address {:?}: {}", s, e)))
}
