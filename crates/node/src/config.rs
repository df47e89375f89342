//! Node configuration.
//!
//! Loaded from a TOML file, then overridden by `SCPT_*` environment
//! variables, then validated. Every field has a default, so an empty file
//! is a valid (single-node, in-memory) configuration.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SCPT_CHAIN_ID` | `chain_id` |
//! | `SCPT_DATA_DIR` | `data_dir` |
//! | `SCPT_LOG_LEVEL` | `log_level` |
//! | `SCPT_GENESIS_FILE` | `genesis_file` |
//! | `SCPT_KEY_FILE` | `key_file` |
//! | `SCPT_ROUND_TIMEOUT_MS` | `consensus.round_timeout_ms` |
//! | `SCPT_MAX_ROUND_TIMEOUT_MS` | `consensus.max_round_timeout_ms` |
//! | `SCPT_BLOCK_INTERVAL_MS` | `consensus.block_interval_ms` |
//! | `SCPT_MAX_TXS_PER_BLOCK` | `consensus.max_txs_per_block` |
//! | `SCPT_CHECKPOINT_SOFT_DEADLINE_MS` | `checkpoint.soft_deadline_ms` |
//! | `SCPT_MEMPOOL_CAPACITY` | `mempool.capacity` |
//! | `SCPT_EPOCH_INTERVAL` | `epoch.interval` |
//! | `SCPT_MAX_VALIDATORS` | `epoch.max_validators` |
//! | `SCPT_TX_TIMEOUT_MS` | `rpc.tx_timeout_ms` |
//!
//! Relative paths in a loaded file are resolved against the file's
//! directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scpt_consensus::EngineConfig;
use scpt_ledger::DEFAULT_MEMPOOL_CAPACITY;
use scpt_validator::EpochConfig;

pub const DEFAULT_CHAIN_ID: &str = "scpt-local";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Time after a checkpoint is finalized by which its attestation is
    /// expected. Missing it is logged, not enforced.
    pub soft_deadline_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            soft_deadline_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub capacity: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMPOOL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long `broadcast_raw_transaction` waits for finalization.
    pub tx_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            tx_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: String,
    /// State directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `EnvFilter` directive, e.g. `info` or `scpt_consensus=debug,info`.
    pub log_level: String,
    pub genesis_file: PathBuf,
    pub key_file: PathBuf,
    pub consensus: EngineConfig,
    pub checkpoint: CheckpointConfig,
    pub mempool: MempoolConfig,
    pub epoch: EpochConfig,
    pub rpc: RpcConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            data_dir: None,
            log_level: "info".to_string(),
            genesis_file: PathBuf::from("genesis.json"),
            key_file: PathBuf::from("node_key.json"),
            consensus: EngineConfig::default(),
            checkpoint: CheckpointConfig::default(),
            mempool: MempoolConfig::default(),
            epoch: EpochConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the config to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        std::fs::write(path, self.to_toml_string()?).map_err(io)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.genesis_file);
        resolve(&mut self.key_file);
        if let Some(dir) = self.data_dir.as_mut() {
            resolve(dir);
        }
    }

    /// Override fields from `SCPT_*` process environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from `lookup`. Unset, empty or unparsable values
    /// leave the current value untouched.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let parse = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        if let Some(v) = get("SCPT_CHAIN_ID") {
            self.chain_id = v;
        }
        if let Some(v) = get("SCPT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCPT_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("SCPT_GENESIS_FILE") {
            self.genesis_file = PathBuf::from(v);
        }
        if let Some(v) = get("SCPT_KEY_FILE") {
            self.key_file = PathBuf::from(v);
        }
        if let Some(v) = parse("SCPT_ROUND_TIMEOUT_MS") {
            self.consensus.round_timeout_ms = v;
        }
        if let Some(v) = parse("SCPT_MAX_ROUND_TIMEOUT_MS") {
            self.consensus.max_round_timeout_ms = v;
        }
        if let Some(v) = parse("SCPT_BLOCK_INTERVAL_MS") {
            self.consensus.block_interval_ms = v;
        }
        if let Some(v) = parse("SCPT_MAX_TXS_PER_BLOCK") {
            self.consensus.max_txs_per_block = v as usize;
        }
        if let Some(v) = parse("SCPT_CHECKPOINT_SOFT_DEADLINE_MS") {
            self.checkpoint.soft_deadline_ms = v;
        }
        if let Some(v) = parse("SCPT_MEMPOOL_CAPACITY") {
            self.mempool.capacity = v as usize;
        }
        if let Some(v) = parse("SCPT_EPOCH_INTERVAL") {
            self.epoch.interval = v;
        }
        if let Some(v) = parse("SCPT_MAX_VALIDATORS") {
            self.epoch.max_validators = v as usize;
        }
        if let Some(v) = parse("SCPT_TX_TIMEOUT_MS") {
            self.rpc.tx_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::Invalid("chain_id is empty".into()));
        }
        let c = &self.consensus;
        if c.round_timeout_ms == 0 {
            return Err(ConfigError::Invalid("consensus.round_timeout_ms must be > 0".into()));
        }
        if c.timeout_backoff_den == 0 || c.timeout_backoff_num < c.timeout_backoff_den {
            return Err(ConfigError::Invalid(format!(
                "consensus timeout backoff {}/{} must be >= 1",
                c.timeout_backoff_num, c.timeout_backoff_den
            )));
        }
        if c.max_round_timeout_ms < c.round_timeout_ms {
            return Err(ConfigError::Invalid(
                "consensus.max_round_timeout_ms is below round_timeout_ms".into(),
            ));
        }
        if c.max_txs_per_block == 0 {
            return Err(ConfigError::Invalid("consensus.max_txs_per_block must be > 0".into()));
        }
        if self.mempool.capacity == 0 {
            return Err(ConfigError::Invalid("mempool.capacity must be > 0".into()));
        }
        EpochConfig::new(self.epoch.interval, self.epoch.max_validators)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_file_is_the_default_config() {
        let cfg = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, NodeConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_resolves_relative_paths_and_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scpt.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
            chain_id = "scpt-testnet"
            data_dir = "db"
            key_file = "/etc/scpt/key.json"

            [consensus]
            round_timeout_ms = 500
            max_round_timeout_ms = 4000

            [mempool]
            capacity = 64
            "#
        )
        .unwrap();

        let cfg = NodeConfig::load(&path).unwrap();
        assert_eq!(cfg.chain_id, "scpt-testnet");
        assert_eq!(cfg.data_dir, Some(dir.path().join("db")));
        assert_eq!(cfg.genesis_file, dir.path().join("genesis.json"));
        assert_eq!(cfg.key_file, PathBuf::from("/etc/scpt/key.json"));
        assert_eq!(cfg.consensus.round_timeout_ms, 500);
        assert_eq!(cfg.consensus.block_interval_ms, EngineConfig::default().block_interval_ms);
        assert_eq!(cfg.mempool.capacity, 64);
    }

    #[test]
    fn env_overrides_win_and_garbage_is_ignored() {
        let env: HashMap<&str, &str> = [
            ("SCPT_CHAIN_ID", "from-env"),
            ("SCPT_ROUND_TIMEOUT_MS", "750"),
            ("SCPT_MEMPOOL_CAPACITY", "not-a-number"),
            ("SCPT_LOG_LEVEL", "  "),
        ]
        .into_iter()
        .collect();
        let mut cfg = NodeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.chain_id, "from-env");
        assert_eq!(cfg.consensus.round_timeout_ms, 750);
        assert_eq!(cfg.mempool.capacity, DEFAULT_MEMPOOL_CAPACITY);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.consensus.timeout_backoff_num = 1;
        cfg.consensus.timeout_backoff_den = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = NodeConfig::default();
        cfg.epoch.interval = 0;
        assert!(cfg.validate().is_err());

        assert!(matches!(
            NodeConfig::from_toml_str("chain_id = 5"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            NodeConfig::load("/nonexistent/scpt.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scpt.toml");
        let mut cfg = NodeConfig::default();
        cfg.chain_id = "saved".into();
        cfg.genesis_file = dir.path().join("g.json");
        cfg.key_file = dir.path().join("k.json");
        cfg.save(&path).unwrap();
        assert_eq!(NodeConfig::from_toml_str(&std::fs::read_to_string(&path).unwrap()).unwrap(), cfg);
    }
}
