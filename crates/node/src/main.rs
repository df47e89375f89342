//! scpt-node: run a single SCPT node, or prepare its files.
//!
//! ```text
//! scpt-node --config scpt.toml init --chain-id scpt-local
//! scpt-node --config scpt.toml run
//! scpt-node keygen --out node_key.json --bls
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scpt_common::heights::{min_guardian_stake, min_validator_stake};
use scpt_common::{tokens, Coins};
use scpt_ledger::{Genesis, GenesisAccount, GenesisStake, StakePurpose};
use scpt_node::{LocalHub, Node, NodeConfig, NodeKey};

/// Balance given to the node's own account by `init`.
const INIT_BALANCE_TOKENS: u64 = 1_000_000;

#[derive(Parser)]
#[command(name = "scpt-node", version, about = "SCPT full node")]
struct Cli {
    /// Node configuration file.
    #[arg(long, short, global = true, default_value = "scpt.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node until ctrl-c or a fatal consensus error.
    Run,
    /// Write a config, a node key and a one-validator genesis next to the
    /// config file.
    Init {
        #[arg(long, default_value = scpt_node::config::DEFAULT_CHAIN_ID)]
        chain_id: String,
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },
    /// Generate a node key file.
    Keygen {
        #[arg(long, default_value = "node_key.json")]
        out: PathBuf,
        /// Include a BLS key for checkpoint committee duty.
        #[arg(long)]
        bls: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run => run(&cli.config).await,
        Command::Init { chain_id, force } => {
            init_logging("info");
            init(&cli.config, &chain_id, force)
        }
        Command::Keygen { out, bls } => {
            init_logging("info");
            let key = NodeKey::generate(bls)?;
            key.save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("{}", key.address());
            Ok(())
        }
    }
}

fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(config_path: &Path) -> Result<()> {
    let config = NodeConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_logging(&config.log_level);

    let genesis = Genesis::load(&config.genesis_file)
        .with_context(|| format!("loading {}", config.genesis_file.display()))?;
    let key = NodeKey::load(&config.key_file)?;
    let address = key.address();

    let hub = LocalHub::new();
    let node = Node::new(config, &genesis, key, hub.endpoint(address))?;
    hub.register(address, node.inbound());
    node.start()?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("interrupt received");
        }
        _ = node.stopped() => {}
    }
    node.stop();
    node.wait().await.context("node exited with an error")?;
    Ok(())
}

fn init(config_path: &Path, chain_id: &str, force: bool) -> Result<()> {
    let dir = config_path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let config = NodeConfig {
        chain_id: chain_id.to_string(),
        data_dir: Some(PathBuf::from("data")),
        ..NodeConfig::default()
    };
    let key_path = dir.join(&config.key_file);
    let genesis_path = dir.join(&config.genesis_file);
    if !force {
        for path in [config_path, key_path.as_path(), genesis_path.as_path()] {
            if path.exists() {
                bail!("{} exists, pass --force to overwrite", path.display());
            }
        }
    }

    let key = NodeKey::generate(true)?;
    let address = key.address();
    let genesis = Genesis {
        chain_id: chain_id.to_string(),
        accounts: vec![GenesisAccount {
            address,
            coins: Coins::new(tokens(INIT_BALANCE_TOKENS), tokens(INIT_BALANCE_TOKENS)),
        }],
        stakes: vec![
            GenesisStake {
                source: address,
                holder: address,
                amount: min_validator_stake(0),
                purpose: StakePurpose::Validator,
                bls_pubkey: None,
            },
            GenesisStake {
                source: address,
                holder: address,
                amount: min_guardian_stake(1),
                purpose: StakePurpose::Guardian,
                bls_pubkey: key.bls_public_key(),
            },
        ],
    };
    genesis.validate()?;

    config.save(config_path)?;
    key.save(&key_path)?;
    std::fs::write(&genesis_path, genesis.to_json_pretty()?)
        .with_context(|| format!("writing {}", genesis_path.display()))?;

    info!(
        chain = chain_id,
        %address,
        config = %config_path.display(),
        "initialized single-validator network"
    );
    Ok(())
}
