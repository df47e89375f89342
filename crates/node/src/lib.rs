//! # SCPT Node
//!
//! Assembles the ledger, validator manager, consensus engine and
//! checkpoint attestor into a running node.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `config` | `NodeConfig`: TOML file plus `SCPT_*` environment overrides |
//! | `key` | node key file (Ed25519 + optional BLS) |
//! | `node` | `Node` context: build, `start`, `stop`, `wait` |
//! | `network` | `LocalHub` in-process transport |
//! | `rpc` | `RpcService` query and submission surface |

pub mod config;
pub mod error;
pub mod key;
pub mod network;
pub mod node;
pub mod rpc;

pub use config::{CheckpointConfig, ConfigError, MempoolConfig, NodeConfig, RpcConfig};
pub use error::{NodeError, NodeResult};
pub use key::NodeKey;
pub use network::{LocalHub, LocalNetwork};
pub use node::{Node, STATE_FILE};
pub use rpc::{
    BroadcastAsyncResult, BroadcastResult, CallResult, CommitteeInfo, RpcError, RpcResult,
    RpcService, StatusResult,
};
