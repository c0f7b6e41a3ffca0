//! capsuleindex CLI: run the capsule mirror and inspect its state.
//!
//! # Commands
//! ```text
//! capsuleindex run                         # periodic sync until Ctrl-C
//! capsuleindex sync                        # one forced pass
//! capsuleindex status                      # sync health as JSON
//! capsuleindex resync --from <block> [--clear]
//! capsuleindex stats
//! capsuleindex get <id>
//! capsuleindex list [--offset N] [--limit N] [--revealed-only] [--tag T]
//! capsuleindex search <query> [--limit N]
//! capsuleindex info
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use capsuleindex_core::types::{EventKind, ListQuery};
use capsuleindex_core::{IndexerConfig, RecordStore, SyncService};
use capsuleindex_evm::abi;
use capsuleindex_storage::SqliteStorage;

mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "capsuleindex",
    about = "Event-sourced mirror of an on-chain time-capsule gallery",
    version
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "capsuleindex.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic sync until interrupted
    Run,

    /// Run one sync pass now and print the result
    Sync,

    /// Print sync health (lag, staleness, drift)
    Status,

    /// Rewind the cursor so the next pass replays from a block
    Resync {
        /// First block to replay
        #[arg(long)]
        from: u64,
        /// Delete all local records before replaying
        #[arg(long)]
        clear: bool,
    },

    /// Print gallery counters
    Stats,

    /// Print one capsule by id
    Get {
        id: u64,
    },

    /// List capsules, newest first
    List {
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 10)]
        limit: u64,
        /// Only revealed capsules
        #[arg(long)]
        revealed_only: bool,
        /// Only capsules carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Search titles, tags and creators
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },

    /// Show build and default configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Info = cli.command {
        cmd_info();
        return Ok(());
    }

    let app = AppConfig::load(&cli.config)?;
    logging::init_tracing(&app.log);
    let service = build_service(&app).await?;

    match cli.command {
        Commands::Run => cmd_run(&service).await?,
        Commands::Sync => print_json(&service.force_sync().await)?,
        Commands::Status => print_json(&service.health().await?)?,
        Commands::Resync { from, clear } => print_json(&service.resync_from(from, clear).await?)?,
        Commands::Stats => print_json(&service.stats().await?)?,
        Commands::Get { id } => {
            let record = service
                .records()
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("capsule #{id} not found"))?;
            print_json(&record)?
        }
        Commands::List {
            offset,
            limit,
            revealed_only,
            tag,
        } => {
            let mut query = ListQuery::page(offset, limit);
            if revealed_only {
                query = query.revealed_only();
            }
            if let Some(tag) = tag {
                query = query.tag(tag);
            }
            print_json(&service.records().list(&query).await?)?
        }
        Commands::Search { query, limit } => {
            print_json(&service.records().search(&query, limit).await?)?
        }
        Commands::Info => unreachable!("handled before config load"),
    }
    Ok(())
}

async fn build_service(app: &AppConfig) -> Result<SyncService> {
    let storage = if app.database_path == ":memory:" {
        SqliteStorage::in_memory().await
    } else {
        SqliteStorage::open(&app.database_path).await
    }
    .with_context(|| format!("opening database {}", app.database_path))?;

    app.builder()
        .build_service(Arc::new(storage))
        .context("building sync service")
}

async fn cmd_run(service: &SyncService) -> Result<()> {
    service.start().await;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    service.shutdown().await;
    Ok(())
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    println!("CapsuleIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default batch window: {} blocks/pass", defaults.batch_window);
    println!("  Max log window: {} blocks/request", defaults.max_log_window);
    println!("  Sync interval: {} ms", defaults.sync_interval_ms);
    println!("  Healthy threshold: {} s", defaults.healthy_threshold_secs);
    println!("  Storage backends: memory, SQLite");
    println!("  Events:");
    for kind in EventKind::ALL {
        println!("    {:<16} {}  {}", kind.event_name(), abi::topic0(kind), abi::signature(kind));
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
