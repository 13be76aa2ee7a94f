//! Sync orchestrator - drains the operation queue into the remote store
//!
//! A drain pass replays every pending operation, oldest first, one at a
//! time. Only one pass may run at once; a request arriving while a pass is
//! active is answered with [`SkipReason::AlreadySyncing`] and not queued.
//!
//! ## Pass outline
//!
//! 1. Take the single-flight flag (released by a guard on every exit path)
//! 2. Probe the remote store; unreachable means "skipped", not an error
//! 3. Replay each pending operation with a per-operation timeout
//! 4. Success: mark synced and write the returned record through to the cache
//! 5. Failure: record it; connectivity failures retry until the attempt
//!    limit, application rejections are dead-lettered at once. Later
//!    operations on the same record stay pending untried for this pass
//! 6. Update the status snapshot; prune synced operations and stale cache
//!    entries if every operation went through
//!
//! A [`StorageError`](clinicsync_core::ports::StorageError) aborts the pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use clinicsync_core::config::SyncConfig;
use clinicsync_core::domain::{
    newtypes::{RecordId, TargetName},
    FailureDisposition, Operation, OperationKind, SkipReason, SyncOutcome, SyncReport,
    SyncStatus,
};
use clinicsync_core::ports::{
    Clock, IOperationQueue, IReadCache, IRemoteStore, ReadFilter, RemoteError, SystemClock,
};

use crate::connectivity::ConnectivityMonitor;
use crate::observer::{ListenerId, Listeners};
use crate::SyncError;

// ============================================================================
// SyncSettings
// ============================================================================

/// Tunables of a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Upper bound for replaying a single operation
    pub operation_timeout: Duration,
    /// Connectivity failures tolerated before dead-lettering
    pub max_attempts: u32,
    /// Age after which synced operations are pruned
    pub retention: chrono::Duration,
    /// Age after which read cache entries are pruned
    pub cache_max_age: chrono::Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            max_attempts: 10,
            retention: chrono::Duration::days(7),
            cache_max_age: chrono::Duration::hours(24),
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            max_attempts: config.max_attempts,
            retention: config.retention(),
            cache_max_age: config.cache_max_age(),
        }
    }
}

// ============================================================================
// Single-flight guard
// ============================================================================

/// Holds the syncing flag for the lifetime of a pass
struct SyncingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// Cache write-through
// ============================================================================

/// Refreshes the by-id cache entry after a confirmed mutation
///
/// The entry uses the same key a `ReadFilter::by_id` read produces, so an
/// offline read of a just-written record finds it. Deletes store an empty
/// result. Failures are logged and ignored.
pub(crate) async fn write_through(
    cache: &dyn IReadCache,
    kind: OperationKind,
    target: &TargetName,
    sent: &Value,
    returned: &Value,
) {
    let record = if returned.is_object() { returned } else { sent };
    let Some(id) = RecordId::from_payload(record).or_else(|| RecordId::from_payload(sent)) else {
        return;
    };

    let key = ReadFilter::by_id(&id).cache_key();
    let value = match kind {
        OperationKind::Delete => json!([]),
        OperationKind::Insert | OperationKind::Update => json!([record]),
    };

    if let Err(e) = cache.cache_write(target, &key, &value).await {
        warn!(table = %target, key = %key, error = %e, "Failed to update read cache");
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Replays queued operations against the remote store
pub struct SyncOrchestrator {
    queue: Arc<dyn IOperationQueue>,
    cache: Arc<dyn IReadCache>,
    remote: Arc<dyn IRemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    syncing: AtomicBool,
    /// `pending_operations` and `last_sync`; the live flags are read on demand
    snapshot: Mutex<SyncStatus>,
    status_listeners: Listeners<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<dyn IOperationQueue>,
        cache: Arc<dyn IReadCache>,
        remote: Arc<dyn IRemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            queue,
            cache,
            remote,
            connectivity,
            clock: Arc::new(SystemClock),
            settings,
            syncing: AtomicBool::new(false),
            snapshot: Mutex::new(SyncStatus::default()),
            status_listeners: Listeners::new(),
        }
    }

    /// Replaces the clock used for `last_sync`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Current status snapshot
    pub fn status(&self) -> SyncStatus {
        let stored = self.lock_snapshot().clone();
        SyncStatus {
            is_online: self.connectivity.is_online(),
            is_syncing: self.syncing.load(Ordering::Acquire),
            ..stored
        }
    }

    /// Registers a callback receiving every published status snapshot
    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.status_listeners.add(listener)
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        self.status_listeners.remove(id)
    }

    /// Recomputes the pending count from the queue and publishes it
    pub async fn refresh_status(&self) -> Result<SyncStatus, SyncError> {
        let pending = self.queue.count_pending().await?;
        self.lock_snapshot().pending_operations = pending;
        self.publish_status();
        Ok(self.status())
    }

    /// Republishes the status on every connectivity transition
    ///
    /// Holds only a weak reference, so the orchestrator can still be dropped.
    pub fn forward_connectivity_changes(self: &Arc<Self>) -> ListenerId {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.connectivity.on_change(move |_| {
            if let Some(orchestrator) = weak.upgrade() {
                orchestrator.publish_status();
            }
        })
    }

    fn publish_status(&self) {
        self.status_listeners.notify(&self.status());
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, SyncStatus> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------------
    // Drain pass
    // ------------------------------------------------------------------------

    /// Runs one drain pass unless another is active or the store is offline
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the local queue fails mid-pass. The
    /// syncing flag is released and the status updated in every case.
    #[tracing::instrument(skip(self))]
    pub async fn sync_pending(&self) -> Result<SyncOutcome, SyncError> {
        let result = {
            let Some(_guard) = SyncingGuard::acquire(&self.syncing) else {
                debug!("Drain pass already running, ignoring request");
                return Ok(SyncOutcome::Skipped {
                    reason: SkipReason::AlreadySyncing,
                });
            };
            self.publish_status();

            if !self.connectivity.refresh().await {
                info!("Remote store unreachable, drain pass skipped");
                None
            } else {
                Some(self.drain().await)
            }
        };

        match result {
            None => {
                self.publish_status();
                Ok(SyncOutcome::Skipped {
                    reason: SkipReason::Offline,
                })
            }
            Some(Ok(report)) => {
                self.publish_status();
                Ok(SyncOutcome::Completed(report))
            }
            Some(Err(err)) => {
                warn!(error = %err, "Drain pass aborted by local storage failure");
                if let Err(e) = self.refresh_status().await {
                    warn!(error = %e, "Could not refresh pending count after aborted pass");
                    self.publish_status();
                }
                Err(err)
            }
        }
    }

    async fn drain(&self) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let pending = self.queue.list_pending().await?;
        let mut report = SyncReport {
            attempted: u32::try_from(pending.len()).unwrap_or(u32::MAX),
            ..SyncReport::default()
        };

        if !pending.is_empty() {
            info!(count = pending.len(), "Replaying pending operations");
        }

        // Records whose earlier operation is still pending after a failure
        let mut held: HashSet<(String, String)> = HashSet::new();

        for op in &pending {
            let record = record_key(op);
            if record.as_ref().is_some_and(|key| held.contains(key)) {
                report.deferred += 1;
                debug!(
                    operation_id = %op.id(),
                    kind = %op.kind(),
                    table = %op.target(),
                    "Earlier operation on this record failed, deferring"
                );
                continue;
            }

            match self.replay(op).await {
                Ok(returned) => {
                    self.queue.mark_synced(op.id()).await?;
                    report.succeeded += 1;
                    debug!(operation_id = %op.id(), kind = %op.kind(), "Operation replayed");
                    write_through(
                        self.cache.as_ref(),
                        op.kind(),
                        op.target(),
                        op.payload(),
                        &returned,
                    )
                    .await;
                }
                Err(err) => {
                    let disposition = if err.is_connectivity() {
                        FailureDisposition::Retry {
                            max_attempts: self.settings.max_attempts,
                        }
                    } else {
                        FailureDisposition::DeadLetter
                    };
                    let failure = self
                        .queue
                        .record_failure(op.id(), &err.to_string(), disposition)
                        .await?;

                    if failure.dead_lettered {
                        report.dead_lettered += 1;
                        warn!(
                            operation_id = %op.id(),
                            kind = %op.kind(),
                            table = %op.target(),
                            attempts = failure.attempts,
                            error = %err,
                            "Operation dead-lettered, it will not be retried automatically"
                        );
                    } else {
                        report.failed += 1;
                        held.extend(record);
                        warn!(
                            operation_id = %op.id(),
                            attempts = failure.attempts,
                            error = %err,
                            "Operation replay failed, will retry on next pass"
                        );
                    }
                }
            }
        }

        report.remaining = self.queue.count_pending().await?;
        {
            let mut snapshot = self.lock_snapshot();
            snapshot.last_sync = Some(self.clock.now());
            snapshot.pending_operations = report.remaining;
        }

        if report.is_clean() {
            self.prune().await;
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            remaining = report.remaining,
            duration_ms = report.duration_ms,
            "{}",
            report.summary()
        );

        Ok(report)
    }

    /// Sends one operation to the remote store, bounded by the timeout
    async fn replay(&self, op: &Operation) -> Result<Value, RemoteError> {
        let timeout = self.settings.operation_timeout;
        let call = async {
            match op.kind() {
                OperationKind::Insert => self.remote.create(op.target(), op.payload()).await,
                OperationKind::Update => {
                    let id = record_id(op)?;
                    self.remote.update(op.target(), &id, op.payload()).await
                }
                OperationKind::Delete => {
                    let id = record_id(op)?;
                    self.remote.delete(op.target(), &id).await
                }
            }
        };

        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(timeout)))
    }

    async fn prune(&self) {
        match self.queue.prune_synced(self.settings.retention).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned synced operations"),
            Err(e) => warn!(error = %e, "Failed to prune synced operations"),
        }
        match self.cache.prune_cache(self.settings.cache_max_age).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned read cache"),
            Err(e) => warn!(error = %e, "Failed to prune read cache"),
        }
    }
}

/// `(table, record id)` an operation touches, if its payload names one
fn record_key(op: &Operation) -> Option<(String, String)> {
    op.record_id()
        .map(|id| (op.target().to_string(), id.as_str().to_string()))
}

/// Record id of an update/delete; a missing id can only be rejected
fn record_id(op: &Operation) -> Result<RecordId, RemoteError> {
    op.record_id().ok_or_else(|| {
        RemoteError::application(None, format!("{} on {} has no record id", op.kind(), op.target()))
    })
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("settings", &self.settings)
            .field("status", &self.status())
            .finish()
    }
}
