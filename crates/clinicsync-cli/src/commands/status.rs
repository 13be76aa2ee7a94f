//! Status command - Show reachability and queue depth
//!
//! Provides the `clinicsync status` CLI command which:
//! 1. Probes the remote store (skipped when no URL is configured)
//! 2. Counts pending and dead-lettered operations in the local queue

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use clinicsync_core::ports::IOperationQueue;

use super::{build_orchestrator, open_queue, GlobalOptions};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only read the local queue, do not contact the remote store
    #[arg(long)]
    pub offline: bool,
}

impl StatusCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let config = opts.load_config()?;
        let db_path = &config.storage.database_path;

        if !db_path.exists() {
            formatter.error(&format!(
                "No offline queue found at {}. Start clinicsyncd or run 'clinicsync enqueue' first.",
                db_path.display()
            ));
            return Ok(());
        }

        let (pool, queue) = open_queue(db_path).await?;
        let pending = queue
            .count_pending()
            .await
            .context("Failed to count pending operations")?;
        let dead_letters = queue
            .list_dead_letters()
            .await
            .context("Failed to list dead letters")?
            .len() as u64;

        // None: not probed
        let online = if self.offline || config.remote.url.is_empty() {
            None
        } else {
            let orchestrator = build_orchestrator(&config, queue)?;
            Some(orchestrator.connectivity().refresh().await)
        };
        pool.close().await;

        if opts.is_json() {
            formatter.print_json(&json!({
                "online": online,
                "remote": config.remote.url,
                "database": db_path.display().to_string(),
                "pending_operations": pending,
                "dead_letters": dead_letters,
            }));
            return Ok(());
        }

        match online {
            Some(true) => formatter.success(&format!("Online ({})", config.remote.url)),
            Some(false) => formatter.warn(&format!(
                "Offline: {} is not reachable",
                config.remote.url
            )),
            None if config.remote.url.is_empty() => {
                formatter.warn("No remote store configured (remote.url)")
            }
            None => formatter.info("Remote store not probed"),
        }
        formatter.info(&format!("Pending:      {}", plural(pending, "operation")));
        if dead_letters > 0 {
            formatter.warn(&format!(
                "{} need attention; see 'clinicsync pending --dead-letters'",
                plural(dead_letters, "dead letter")
            ));
        }
        formatter.info(&format!("Database:     {}", db_path.display()));

        Ok(())
    }
}
