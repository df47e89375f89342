//! Block structure
//!
//! A block is immutable once built and referenced by the SHA3-512 hash of
//! its bincode-encoded header. The header commits to the transactions
//! through `tx_root` (Merkle root over `sha3(tx bytes)`) and to the
//! resulting ledger state through `state_root`.

use scpt_common::{sha3_512, Address, Hash};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::state::merkle_root;
use crate::tx::Tx;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    pub parent: Hash,
    pub proposer: Address,
    /// State root after applying every transaction in the block.
    pub state_root: Hash,
    pub tx_root: Hash,
    /// Unix milliseconds, as claimed by the proposer. Never read by
    /// ledger rules.
    pub timestamp: u64,
}

impl BlockHeader {
    #[must_use]
    pub fn hash(&self) -> Hash {
        sha3_512(&bincode::serialize(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn new(
        chain_id: &str,
        height: u64,
        parent: Hash,
        proposer: Address,
        state_root: Hash,
        timestamp: u64,
        txs: Vec<Tx>,
    ) -> Self {
        let tx_root = Self::compute_tx_root(&txs);
        Block {
            header: BlockHeader {
                chain_id: chain_id.to_string(),
                height,
                parent,
                proposer,
                state_root,
                tx_root,
                timestamp,
            },
            txs,
        }
    }

    /// Height-0 block anchoring the genesis state.
    pub fn genesis(chain_id: &str, state_root: Hash) -> Self {
        Self::new(chain_id, 0, Hash::ZERO, Address::ZERO, state_root, 0, Vec::new())
    }

    pub fn compute_tx_root(txs: &[Tx]) -> Hash {
        let leaves = txs
            .iter()
            .map(|tx| sha3_512(&bincode::serialize(tx).unwrap_or_default()))
            .collect();
        merkle_root(leaves)
    }

    #[must_use]
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.header.height
    }

    #[must_use]
    pub fn parent(&self) -> Hash {
        self.header.parent
    }

    /// Structural checks that need no state: chain id and tx root.
    pub fn check_basic(&self, chain_id: &str) -> LedgerResult<()> {
        if self.header.chain_id != chain_id {
            return Err(LedgerError::InvalidBlock(format!(
                "chain id {} != {}",
                self.header.chain_id, chain_id
            )));
        }
        let computed = Self::compute_tx_root(&self.txs);
        if computed != self.header.tx_root {
            return Err(LedgerError::InvalidBlock(format!(
                "tx root mismatch at height {}",
                self.header.height
            )));
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
