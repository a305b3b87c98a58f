//! verifield-indexer: keeps the VeriField read model in sync with the chain.
//!
//! # Commands
//! ```text
//! verifield-indexer run-once
//! verifield-indexer watch
//! verifield-indexer status
//! verifield-indexer balance <ADDRESS>
//! verifield-indexer recent  [--limit N]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use verifield_core::checkpoint::{Checkpoint, CheckpointManager};
use verifield_core::config::IndexerConfig;
use verifield_core::store::{ReadModelCounts, ReadModelStore};
use verifield_evm::{HttpRpcClient, IndexerBuilder, IndexingCycle};
use verifield_storage::SqliteStore;

mod logging;

#[derive(Parser)]
#[command(
    name = "verifield-indexer",
    about = "Index VeriField dataset mints, verifications and sales into a queryable read model",
    long_about = "
Reads Minted / Verified / Purchased events from the VeriField contracts and
projects them into a SQLite read model, advancing a per-contract checkpoint.

ENVIRONMENT VARIABLES:
  VERIFIELD_RPC_URL                 JSON-RPC endpoint
  VERIFIELD_ASSET_CONTRACT          Dataset NFT contract address
  VERIFIELD_MARKETPLACE_CONTRACT    Marketplace contract address
  VERIFIELD_DATABASE_URL            SQLite database URL
  RUST_LOG                          Log filter (overrides [log] level)
",
    version
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "verifield.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one indexing cycle and print its summary as JSON
    #[command(name = "run-once")]
    RunOnce,

    /// Run a cycle every poll interval until Ctrl-C
    Watch {
        /// Override `poll_interval_ms` from the config
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Print per-contract checkpoints and read-model row counts
    Status,

    /// Print the credit balance of an address
    Balance {
        /// 0x-prefixed address
        address: String,
    },

    /// Print the most recently minted datasets
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if cli.verbose {
        config.log.level = "debug".into();
    }
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::RunOnce => cmd_run_once(config).await,
        Commands::Watch { interval_ms } => cmd_watch(config, interval_ms).await,
        Commands::Status => cmd_status(config).await,
        Commands::Balance { address } => cmd_balance(config, &address).await,
        Commands::Recent { limit } => cmd_recent(config, limit).await,
    }
}

/// File values (when the file exists) overridden by `VERIFIELD_*` variables.
fn load_config(path: &Path) -> Result<IndexerConfig> {
    let mut config = if path.exists() {
        IndexerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?
    } else {
        IndexerConfig::default()
    };
    config.apply_env();
    Ok(config)
}

async fn open_store(config: &IndexerConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    Ok(Arc::new(store))
}

async fn build_cycle(config: IndexerConfig) -> Result<IndexingCycle<HttpRpcClient>> {
    config.validate().context("invalid configuration")?;
    tracing::info!(
        id = %config.id,
        sources = ?config.sources()?,
        database = %config.database_url,
        "indexer configured"
    );
    let store = open_store(&config).await?;
    IndexerBuilder::from_config(config)
        .storage(store)
        .build_http()
        .context("building indexing cycle")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run_once(config: IndexerConfig) -> Result<()> {
    let cycle = build_cycle(config).await?;
    match cycle.run_once().await {
        Ok(summary) => print_json(&summary),
        Err(failure) => {
            print_json(&failure)?;
            std::process::exit(1);
        }
    }
}

async fn cmd_watch(config: IndexerConfig, interval_ms: Option<u64>) -> Result<()> {
    let interval = Duration::from_millis(interval_ms.unwrap_or(config.poll_interval_ms).max(1));
    let cycle = build_cycle(config).await?;
    cycle
        .watch(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    checkpoints: Vec<Checkpoint>,
    counts: ReadModelCounts,
}

async fn cmd_status(config: IndexerConfig) -> Result<()> {
    let sources = config.sources().context("invalid configuration")?;
    let store = open_store(&config).await?;
    let manager = CheckpointManager::new(store.clone(), sources);
    let status = Status {
        checkpoints: manager.snapshot().await?,
        counts: store.counts().await?,
    };
    print_json(&status)
}

async fn cmd_balance(config: IndexerConfig, address: &str) -> Result<()> {
    let store = open_store(&config).await?;
    let balance = store.credit_balance(address).await?;
    print_json(&serde_json::json!({
        "address": address.to_ascii_lowercase(),
        "balance": balance.to_string(),
    }))
}

async fn cmd_recent(config: IndexerConfig, limit: usize) -> Result<()> {
    let store = open_store(&config).await?;
    print_json(&store.recent_datasets(limit).await?)
}
