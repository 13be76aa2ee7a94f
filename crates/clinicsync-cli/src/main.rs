//! clinicsync CLI - Operator tools for the clinic offline queue
//!
//! Provides commands for:
//! - Checking reachability and queue depth
//! - Listing queued and dead-lettered operations
//! - Running a drain pass on demand
//! - Pruning, requeuing and hand-queuing operations

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    enqueue::EnqueueCommand, pending::PendingCommand, prune::PruneCommand,
    requeue::RequeueCommand, status::StatusCommand, sync::SyncCommand, GlobalOptions,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "clinicsync", version, about = "Offline sync queue for the clinic app")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show reachability and queue depth
    Status(StatusCommand),
    /// List queued operations
    Pending(PendingCommand),
    /// Replay queued operations now
    Sync(SyncCommand),
    /// Delete old synced operations and stale cache entries
    Prune(PruneCommand),
    /// Retry a dead-lettered operation
    Requeue(RequeueCommand),
    /// Queue a mutation without contacting the remote store
    Enqueue(EnqueueCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let opts = GlobalOptions {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        config_path: cli.config,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&opts).await,
        Commands::Pending(cmd) => cmd.execute(&opts).await,
        Commands::Sync(cmd) => cmd.execute(&opts).await,
        Commands::Prune(cmd) => cmd.execute(&opts).await,
        Commands::Requeue(cmd) => cmd.execute(&opts).await,
        Commands::Enqueue(cmd) => cmd.execute(&opts).await,
    }
}
