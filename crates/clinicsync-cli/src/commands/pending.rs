//! Pending command - List queued operations

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use clinicsync_core::ports::IOperationQueue;

use super::{open_queue, operation_json, operation_line, GlobalOptions};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct PendingCommand {
    /// List dead-lettered operations instead of the replay queue
    #[arg(long)]
    pub dead_letters: bool,

    /// Show at most this many operations
    #[arg(long)]
    pub limit: Option<usize>,
}

impl PendingCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let config = opts.load_config()?;
        let (pool, queue) = open_queue(&config.storage.database_path).await?;
        let limit = self.limit.unwrap_or(usize::MAX);

        if self.dead_letters {
            let dead = queue
                .list_dead_letters()
                .await
                .context("Failed to list dead letters")?;
            pool.close().await;

            if opts.is_json() {
                let items: Vec<Value> = dead
                    .iter()
                    .take(limit)
                    .map(|(op, failure)| operation_json(op, Some(failure)))
                    .collect();
                formatter.print_json(&Value::Array(items));
                return Ok(());
            }

            if dead.is_empty() {
                formatter.success("No dead-lettered operations");
                return Ok(());
            }
            formatter.warn(&format!(
                "{} will not be retried automatically",
                plural(dead.len() as u64, "operation")
            ));
            for (op, failure) in dead.iter().take(limit) {
                formatter.info(&operation_line(op));
                formatter.info(&format!(
                    "    {} attempt(s), last: {}",
                    failure.attempts, failure.last_error
                ));
            }
            formatter.info("Use 'clinicsync requeue <id>' to retry one.");
            return Ok(());
        }

        let pending = queue
            .list_pending()
            .await
            .context("Failed to list pending operations")?;
        pool.close().await;

        if opts.is_json() {
            let items: Vec<Value> = pending
                .iter()
                .take(limit)
                .map(|op| operation_json(op, None))
                .collect();
            formatter.print_json(&Value::Array(items));
            return Ok(());
        }

        if pending.is_empty() {
            formatter.success("Queue is empty");
            return Ok(());
        }
        formatter.success(&format!(
            "{} waiting for sync",
            plural(pending.len() as u64, "operation")
        ));
        for op in pending.iter().take(limit) {
            formatter.info(&operation_line(op));
        }
        if pending.len() > limit {
            formatter.info(&format!("... and {} more", pending.len() - limit));
        }

        Ok(())
    }
}
