//! Prune command - Delete old synced operations and stale cache entries

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use clinicsync_core::ports::{IOperationQueue, IReadCache};

use super::{open_queue, GlobalOptions};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct PruneCommand {
    /// Keep synced operations younger than this many days (default: sync.retention_days)
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Keep cache entries younger than this many hours (default: sync.cache_max_age_hours)
    #[arg(long)]
    pub cache_max_age_hours: Option<u32>,
}

impl PruneCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let config = opts.load_config()?;

        let retention = chrono::Duration::days(i64::from(
            self.retention_days.unwrap_or(config.sync.retention_days),
        ));
        let cache_max_age = chrono::Duration::hours(i64::from(
            self.cache_max_age_hours
                .unwrap_or(config.sync.cache_max_age_hours),
        ));

        let (pool, queue) = open_queue(&config.storage.database_path).await?;
        let operations = queue
            .prune_synced(retention)
            .await
            .context("Failed to prune synced operations")?;
        let cache_entries = queue
            .prune_cache(cache_max_age)
            .await
            .context("Failed to prune read cache")?;
        pool.close().await;

        if opts.is_json() {
            formatter.print_json(&json!({
                "operations_pruned": operations,
                "cache_entries_pruned": cache_entries,
            }));
        } else {
            formatter.success(&format!(
                "Pruned {} and {}",
                plural(operations, "synced operation"),
                plural(cache_entries, "stale cache row")
            ));
        }

        Ok(())
    }
}
