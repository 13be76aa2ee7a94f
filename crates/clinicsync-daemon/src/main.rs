//! clinicsync daemon - keeps the clinic's offline queue draining
//!
//! This binary runs next to the reception application and handles:
//! - Reachability probing of the hosted data store
//! - Draining queued writes on reconnect, on a timer and on the weekly flush
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the SQLite queue, the REST adapter and the sync
//! components together, then hands control to the [`SyncScheduler`]. The
//! scheduler loop is controlled by a `CancellationToken` that is triggered
//! on receipt of SIGTERM or SIGINT.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clinicsync_cache::{DatabasePool, SqliteOperationQueue};
use clinicsync_core::config::{Config, LoggingConfig};
use clinicsync_remote::RestRemoteStore;
use clinicsync_sync::{
    ConnectivityMonitor, ConnectivitySettings, SchedulerSettings, SyncOrchestrator, SyncScheduler,
    SyncSettings,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Overrides the configuration file location
const ENV_CONFIG_PATH: &str = "CLINICSYNC_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Wired-up sync components plus the shutdown token
struct DaemonService {
    config: Config,
    db_pool: DatabasePool,
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and builds the adapters
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = &config.storage.database_path;
        let db_pool = DatabasePool::new(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        info!(db_path = %db_path.display(), "Opened offline queue");

        let queue = Arc::new(SqliteOperationQueue::new(db_pool.pool().clone()));
        let remote = Arc::new(
            RestRemoteStore::from_config(&config.remote)
                .context("Failed to build remote store client")?,
        );

        let connectivity = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            ConnectivitySettings::from(&config.connectivity),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            queue,
            remote,
            connectivity,
            SyncSettings::from(&config.sync),
        ));

        Ok(Self {
            config,
            db_pool,
            orchestrator,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        self.orchestrator.forward_connectivity_changes();
        self.orchestrator.on_status_change(|status| {
            info!(
                online = status.is_online,
                syncing = status.is_syncing,
                pending = status.pending_operations,
                last_sync = ?status.last_sync,
                "Sync status changed"
            );
        });

        let online = self.orchestrator.connectivity().refresh().await;
        let status = self
            .orchestrator
            .refresh_status()
            .await
            .context("Failed to read the offline queue")?;
        info!(
            online,
            pending = status.pending_operations,
            remote = %self.config.remote.url,
            "Initial state"
        );

        let scheduler = SyncScheduler::new(
            Arc::clone(&self.orchestrator),
            SchedulerSettings::from(&self.config),
        );

        // Work queued while the daemon was down goes out right away
        if online && status.pending_operations > 0 {
            scheduler.trigger().request();
        }

        scheduler.run(self.shutdown.clone()).await;

        self.db_pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

fn load_config() -> Result<Config> {
    let path = std::env::var_os(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let mut config = if path.exists() {
        Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!(
            "Invalid configuration ({}):\n  {}",
            path.display(),
            details.join("\n  ")
        );
    }

    Ok(config)
}

/// Installs the tracing subscriber; `RUST_LOG` wins over the config level
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    info!("clinicsync daemon starting (clinicsyncd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("clinicsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "clinicsync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
