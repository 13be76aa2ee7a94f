//! clinicsync Sync - Offline-first write path and queue draining
//!
//! Provides:
//! - A write interceptor that falls back to the local queue on connectivity loss
//! - Connectivity tracking backed by an active probe of the remote store
//! - Single-flight drain passes replaying queued operations in FIFO order
//! - A scheduler turning reconnects, timers and manual requests into passes
//!
//! ## Modules
//!
//! - [`connectivity`] - Online/offline state with probe verification
//! - [`interceptor`] - `OfflineWriter`, the entry point for application writes
//! - [`observer`] - Listener registry used for status fan-out
//! - [`orchestrator`] - `SyncOrchestrator`, one drain pass at a time
//! - [`scheduler`] - Trigger loop driving the orchestrator

pub mod connectivity;
pub mod interceptor;
pub mod observer;
pub mod orchestrator;
pub mod scheduler;

use clinicsync_core::ports::StorageError;
use thiserror::Error;

pub use connectivity::{ConnectivityMonitor, ConnectivitySettings};
pub use interceptor::{OfflineWriter, ReadOutcome, WriteError, WriteOutcome};
pub use observer::{ListenerId, Listeners};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use scheduler::{next_weekly_flush, SchedulerSettings, SyncScheduler, SyncTrigger};

/// Errors that abort a drain pass
///
/// Per-operation remote failures never surface here; they are recorded
/// against the operation and retried on a later pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local queue could not be read or written
    #[error("Local storage failure during sync: {0}")]
    Storage(#[from] StorageError),
}
