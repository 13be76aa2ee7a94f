//! CLI subcommands and the wiring they share

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use clinicsync_cache::{DatabasePool, SqliteOperationQueue};
use clinicsync_core::config::Config;
use clinicsync_core::domain::{DeliveryFailure, Operation};
use clinicsync_remote::RestRemoteStore;
use clinicsync_sync::{ConnectivityMonitor, ConnectivitySettings, SyncOrchestrator, SyncSettings};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

pub mod enqueue;
pub mod pending;
pub mod prune;
pub mod requeue;
pub mod status;
pub mod sync;

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub format: OutputFormat,
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
}

impl GlobalOptions {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Loads the configuration and applies environment overrides
    ///
    /// An explicit `--config` path must exist and parse. A missing or
    /// malformed file at the default path falls back to built-in defaults.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => {
                let path = Config::default_path();
                info!(config_path = %path.display(), "Loading configuration");
                load_from_default_location(&path)
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

fn load_from_default_location(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    Config::load(path).unwrap_or_else(|e| {
        warn!(
            config_path = %path.display(),
            error = %e,
            "Ignoring unreadable configuration file, using built-in defaults"
        );
        Config::default()
    })
}

/// Fails with every validation problem listed
pub fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    anyhow::bail!("Invalid configuration:\n  {}", details.join("\n  "))
}

/// Opens the queue database named by the configuration
pub async fn open_queue(db_path: &Path) -> Result<(DatabasePool, Arc<SqliteOperationQueue>)> {
    let pool = DatabasePool::new(db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let queue = Arc::new(SqliteOperationQueue::new(pool.pool().clone()));
    Ok((pool, queue))
}

/// Builds a one-shot orchestrator over `queue` and the configured store
pub fn build_orchestrator(
    config: &Config,
    queue: Arc<SqliteOperationQueue>,
) -> Result<Arc<SyncOrchestrator>> {
    let remote = Arc::new(
        RestRemoteStore::from_config(&config.remote).context("Failed to build remote store client")?,
    );
    let connectivity = Arc::new(ConnectivityMonitor::new(
        remote.clone(),
        ConnectivitySettings::from(&config.connectivity),
    ));
    Ok(Arc::new(SyncOrchestrator::new(
        queue.clone(),
        queue,
        remote,
        connectivity,
        SyncSettings::from(&config.sync),
    )))
}

/// JSON view of a queued operation, with its failure history if any
pub fn operation_json(op: &Operation, failure: Option<&DeliveryFailure>) -> Value {
    let mut value = json!({
        "id": op.id().as_str(),
        "kind": op.kind().as_str(),
        "target": op.target().as_str(),
        "created_at": op.created_at().to_rfc3339(),
        "payload": op.payload(),
    });
    if let Some(failure) = failure {
        value["attempts"] = json!(failure.attempts);
        value["last_error"] = json!(failure.last_error);
        value["last_attempt_at"] = json!(failure.last_attempt_at.to_rfc3339());
        value["dead_lettered"] = json!(failure.dead_lettered);
    }
    value
}

/// One-line human summary of a queued operation
pub fn operation_line(op: &Operation) -> String {
    let record = op
        .record_id()
        .map(|id| format!(" id={id}"))
        .unwrap_or_default();
    format!(
        "{}  {:<6} {}{}  ({})",
        op.id(),
        op.kind(),
        op.target(),
        record,
        op.created_at().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
