//! `indexooor`: follow a chain block by block and record which storage slots of
//! the watched contracts changed, and to what.

use alloy::primitives::Address;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indexooor::chain::RpcChainClient;
use indexooor::config::{IndexerConfig, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT};
use indexooor::indexer::{IndexingLoop, TokioClock};
use indexooor::storage::{IndexDb, RunStore, StoreConfig};
use indexooor::utils::env_guard::load_dot_env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "indexooor", version, about = "Per-block contract storage slot indexer")]
struct Cli {
    /// JSON-RPC endpoint of an archive node with the debug namespace enabled
    #[arg(long, env = "INDEXER_RPC_URL", global = true)]
    rpc: Option<String>,

    /// SQLite database file
    #[arg(long, env = "INDEXER_DB_PATH", default_value = "indexooor.db", global = true)]
    db: PathBuf,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index storage changes until stopped
    Index(IndexArgs),
    /// Print stored entries or a run as JSON lines
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct IndexArgs {
    /// Comma-separated contract addresses to watch
    #[arg(long, env = "INDEXER_CONTRACT_ADDRESSES")]
    contract_addresses: String,

    /// First block of a new run
    #[arg(long, env = "INDEXER_START_BLOCK", default_value_t = 0)]
    start_block: u64,

    /// Existing run to resume; 0 starts a new run
    #[arg(long, env = "INDEXER_RUN_ID", default_value_t = 0)]
    run_id: i64,

    #[arg(long, env = "INDEXER_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval_secs: u64,

    #[arg(long, env = "INDEXER_REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64)]
    request_timeout_ms: u64,

    /// `<address>=<path>` to a solc storageLayout JSON file (repeatable)
    #[arg(long = "storage-layout")]
    storage_layouts: Vec<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Print every stored entry of this contract
    #[arg(long, conflicts_with = "run_id")]
    contract: Option<String>,

    /// Print the run with this id
    #[arg(long)]
    run_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = load_dot_env(".env");
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.debug { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    if loaded > 0 {
        tracing::debug!("[STARTUP] Loaded {} variable(s) from .env", loaded);
    }

    let db = IndexDb::open(&StoreConfig::new(&cli.db))
        .with_context(|| format!("opening database {}", cli.db.display()))?;

    match cli.command {
        Command::Index(args) => index(cli.rpc.as_deref().unwrap_or_default(), db, args).await,
        Command::Show(args) => show(&db, args),
    }
}

async fn index(rpc: &str, db: IndexDb, args: IndexArgs) -> anyhow::Result<()> {
    let config = IndexerConfig::new(rpc, &args.contract_addresses)?
        .with_start_block(args.start_block)
        .with_run_id(args.run_id)
        .with_poll_interval(Duration::from_secs(args.poll_interval_secs))?
        .with_request_timeout(Duration::from_millis(args.request_timeout_ms))?
        .with_layout_specs(&args.storage_layouts)?;

    tracing::info!(
        "[STARTUP] Indexing {} contract(s) via {} into {}",
        config.contracts.len(),
        config.rpc_url,
        db.path().display()
    );

    let chain = RpcChainClient::new(config.rpc_url.clone(), config.request_timeout);
    let mut indexer = IndexingLoop::start(chain, Arc::new(db), TokioClock::new(), &config)
        .await
        .context("starting indexer")?;

    let outcome = tokio::select! {
        result = indexer.run_forever() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(result) => {
            result.with_context(|| format!("indexing stopped at block {}", indexer.current_block()))
        }
        None => {
            tracing::info!(
                "[INDEXER] Interrupted; run {} processed through block {}.",
                indexer.run().id,
                indexer.run().last_processed_block
            );
            Ok(())
        }
    }
}

fn show(db: &IndexDb, args: ShowArgs) -> anyhow::Result<()> {
    if let Some(raw) = args.contract {
        let contract = Address::from_str(raw.trim())
            .with_context(|| format!("invalid contract address `{raw}`"))?;
        for entry in db.entries_for_contract(contract)? {
            println!("{}", serde_json::to_string(&entry)?);
        }
        return Ok(());
    }
    if let Some(run_id) = args.run_id {
        let run = db
            .fetch_run(run_id)?
            .with_context(|| format!("run {run_id} not found"))?;
        println!("{}", serde_json::to_string(&run)?);
        return Ok(());
    }
    println!("{} storage entries stored", db.entry_count()?);
    Ok(())
}
