//! Sync command - Run one drain pass now
//!
//! Provides the `clinicsync sync` CLI command which:
//! 1. Loads and validates the configuration
//! 2. Opens the local queue and builds the REST adapter
//! 3. Runs a single drain pass and displays the report

use anyhow::Result;
use clap::Args;
use serde_json::json;

use clinicsync_core::domain::{SkipReason, SyncOutcome, SyncReport};

use super::{build_orchestrator, ensure_valid, open_queue, GlobalOptions};
use crate::output::OutputFormatter;

#[derive(Debug, Args)]
pub struct SyncCommand {}

impl SyncCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let config = opts.load_config()?;
        ensure_valid(&config)?;

        let (pool, queue) = open_queue(&config.storage.database_path).await?;
        let orchestrator = build_orchestrator(&config, queue)?;

        formatter.info("Replaying queued operations...");
        let outcome = orchestrator.sync_pending().await;
        pool.close().await;
        let outcome = outcome?;

        if opts.is_json() {
            formatter.print_json(&json!(outcome));
            return Ok(());
        }

        match outcome {
            SyncOutcome::Completed(report) => show_report(&report, &*formatter),
            SyncOutcome::Skipped {
                reason: SkipReason::Offline,
            } => formatter.warn(&format!(
                "Remote store {} is unreachable; nothing was sent",
                config.remote.url
            )),
            SyncOutcome::Skipped {
                reason: SkipReason::AlreadySyncing,
            } => formatter.warn("A sync pass is already running"),
        }

        Ok(())
    }
}

fn show_report(report: &SyncReport, formatter: &dyn OutputFormatter) {
    if report.is_clean() {
        formatter.success(&report.summary());
    } else {
        formatter.warn(&report.summary());
    }
    formatter.info(&format!("Duration:   {}", format_duration(report.duration_ms)));
    if report.remaining > 0 {
        formatter.info(&format!("Remaining:  {}", report.remaining));
    }
    if report.dead_lettered > 0 {
        formatter.info("See 'clinicsync pending --dead-letters' for rejected operations");
    }
}

fn format_duration(millis: u64) -> String {
    if millis >= 1000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        format!("{}ms", millis)
    }
}
