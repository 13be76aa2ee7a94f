//! Write interceptor - the application's entry point for mutations
//!
//! [`OfflineWriter`] tries every write against the remote store first. What
//! happens on failure depends on why it failed:
//!
//! | Failure            | Result                                            |
//! |--------------------|---------------------------------------------------|
//! | Connectivity       | queued locally, optimistic `WriteOutcome::Queued` |
//! | Application        | `WriteError::Application`, never queued           |
//! | Local storage      | `WriteError::Storage` (nothing was saved)         |
//!
//! A write that would overtake queued work goes to the queue behind it
//! instead: updates and deletes when the same record has pending
//! operations, inserts when the table has any.
//!
//! Reads go to the remote store too and fall back to the read cache when the
//! store cannot be reached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use clinicsync_core::domain::{
    newtypes::{OperationId, RecordId, TargetName},
    operation::validate_payload,
    DomainError, OperationKind,
};
use clinicsync_core::ports::{
    IOperationQueue, IReadCache, IRemoteStore, ReadFilter, RemoteError, StorageError,
};

use crate::connectivity::ConnectivityMonitor;
use crate::orchestrator::{write_through, SyncOrchestrator};

/// Field added to queued records carrying the operation id
pub const OFFLINE_ID_FIELD: &str = "_offline_id";
/// Field added to queued records marking them as not yet confirmed
pub const PENDING_SYNC_FIELD: &str = "_pending_sync";

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Result of a write that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The remote store applied the write; holds the stored record
    Confirmed(Value),
    /// The write was saved locally and will be replayed later
    Queued {
        /// Submitted payload plus the offline markers
        record: Value,
        operation_id: OperationId,
    },
}

impl WriteOutcome {
    pub fn record(&self) -> &Value {
        match self {
            WriteOutcome::Confirmed(record) | WriteOutcome::Queued { record, .. } => record,
        }
    }

    pub fn into_record(self) -> Value {
        match self {
            WriteOutcome::Confirmed(record) | WriteOutcome::Queued { record, .. } => record,
        }
    }

    /// True for optimistic results not yet confirmed by the remote store
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}

/// Result of a read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Straight from the remote store
    Fresh(Vec<Value>),
    /// Served from the local cache because the store was unreachable
    Cached {
        records: Vec<Value>,
        cached_at: DateTime<Utc>,
    },
}

impl ReadOutcome {
    pub fn records(&self) -> &[Value] {
        match self {
            ReadOutcome::Fresh(records) | ReadOutcome::Cached { records, .. } => records,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ReadOutcome::Cached { .. })
    }
}

/// Failures surfaced to the caller of a write or read
#[derive(Debug, Error)]
pub enum WriteError {
    /// The payload can never be applied (not an object, missing record id)
    #[error("Invalid write: {0}")]
    Invalid(#[from] DomainError),

    /// The remote store rejected the write
    #[error("{0}")]
    Application(RemoteError),

    /// The write could not be saved locally
    #[error("Could not save write locally: {0}")]
    Storage(#[from] StorageError),

    /// Reads only: the store is unreachable and nothing is cached
    #[error("{0}; no cached copy available")]
    Connectivity(RemoteError),
}

// ============================================================================
// OfflineWriter
// ============================================================================

/// Remote-first writer that queues on connectivity loss
pub struct OfflineWriter {
    remote: Arc<dyn IRemoteStore>,
    queue: Arc<dyn IOperationQueue>,
    cache: Arc<dyn IReadCache>,
    connectivity: Arc<ConnectivityMonitor>,
    orchestrator: Option<Arc<SyncOrchestrator>>,
    timeout: Duration,
    force_offline: AtomicBool,
}

impl OfflineWriter {
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        queue: Arc<dyn IOperationQueue>,
        cache: Arc<dyn IReadCache>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            remote,
            queue,
            cache,
            connectivity,
            orchestrator: None,
            timeout: Duration::from_secs(5),
            force_offline: AtomicBool::new(false),
        }
    }

    /// Bounds each direct remote call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keeps the orchestrator's pending count current after each enqueue
    pub fn with_orchestrator(mut self, orchestrator: Arc<SyncOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// When set, writes go straight to the queue without a remote attempt
    pub fn set_force_offline(&self, force: bool) {
        self.force_offline.store(force, Ordering::Release);
    }

    pub fn is_force_offline(&self) -> bool {
        self.force_offline.load(Ordering::Acquire)
    }

    pub async fn insert(
        &self,
        target: &TargetName,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        self.write(OperationKind::Insert, target, payload).await
    }

    /// Updates the record named by the payload's `id`
    pub async fn update(
        &self,
        target: &TargetName,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        self.write(OperationKind::Update, target, payload).await
    }

    /// Deletes the record named by the payload's `id`
    pub async fn delete(
        &self,
        target: &TargetName,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        self.write(OperationKind::Delete, target, payload).await
    }

    /// Applies a mutation remotely, or queues it if the store is unreachable
    ///
    /// # Errors
    /// - `WriteError::Invalid` before any I/O if the payload is malformed
    /// - `WriteError::Application` if the store rejects the write
    /// - `WriteError::Storage` if the queue cannot be read or written
    #[tracing::instrument(skip(self, payload), fields(table = %target))]
    pub async fn write(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        validate_payload(kind, target, &payload)?;

        if self.is_force_offline() {
            debug!(%kind, "Offline mode forced, queuing without remote attempt");
            return self.enqueue(kind, target, payload).await;
        }

        if self.has_queued_predecessor(kind, target, &payload).await? {
            debug!(%kind, "Earlier writes still queued, queuing behind them");
            return self.enqueue(kind, target, payload).await;
        }

        match self.send(kind, target, &payload).await {
            Ok(record) => {
                write_through(self.cache.as_ref(), kind, target, &payload, &record).await;
                Ok(WriteOutcome::Confirmed(record))
            }
            Err(err) if err.is_connectivity() => {
                info!(%kind, error = %err, "Remote store unreachable, queuing write");
                self.suspect_outage();
                self.enqueue(kind, target, payload).await
            }
            Err(err) => {
                warn!(%kind, error = %err, "Remote store rejected write");
                Err(WriteError::Application(err))
            }
        }
    }

    /// Reads from the remote store, falling back to the cache when offline
    ///
    /// Fresh results are written to the cache under `filter.cache_key()`.
    #[tracing::instrument(skip(self, filter), fields(table = %target))]
    pub async fn read(
        &self,
        target: &TargetName,
        filter: &ReadFilter,
    ) -> Result<ReadOutcome, WriteError> {
        let key = filter.cache_key();

        let result = if self.is_force_offline() {
            Err(RemoteError::Connectivity("offline mode forced".to_string()))
        } else {
            tokio::time::timeout(self.timeout, self.remote.read(target, filter))
                .await
                .unwrap_or(Err(RemoteError::Timeout(self.timeout)))
        };

        match result {
            Ok(records) => {
                let value = Value::Array(records.clone());
                if let Err(e) = self.cache.cache_write(target, &key, &value).await {
                    warn!(key = %key, error = %e, "Failed to update read cache");
                }
                Ok(ReadOutcome::Fresh(records))
            }
            Err(err) if err.is_connectivity() => {
                if !self.is_force_offline() {
                    self.suspect_outage();
                }
                match self.cache.cache_read(target, &key).await {
                    Ok(Some(entry)) => {
                        debug!(key = %key, cached_at = %entry.cached_at, "Serving cached read");
                        let records = match entry.payload {
                            Value::Array(records) => records,
                            Value::Null => Vec::new(),
                            other => vec![other],
                        };
                        Ok(ReadOutcome::Cached {
                            records,
                            cached_at: entry.cached_at,
                        })
                    }
                    Ok(None) => Err(WriteError::Connectivity(err)),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to read cache");
                        Err(WriteError::Connectivity(err))
                    }
                }
            }
            Err(err) => Err(WriteError::Application(err)),
        }
    }

    async fn send(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        let call = async {
            match kind {
                OperationKind::Insert => self.remote.create(target, payload).await,
                OperationKind::Update => {
                    let id = record_id(payload)?;
                    self.remote.update(target, &id, payload).await
                }
                OperationKind::Delete => {
                    let id = record_id(payload)?;
                    self.remote.delete(target, &id).await
                }
            }
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(self.timeout)))
    }

    /// True if a pending operation must be replayed before this write
    async fn has_queued_predecessor(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: &Value,
    ) -> Result<bool, StorageError> {
        let pending = self.queue.list_pending().await?;
        let id = RecordId::from_payload(payload);

        Ok(pending.iter().any(|op| {
            op.target() == target && (kind == OperationKind::Insert || op.record_id() == id)
        }))
    }

    async fn enqueue(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: Value,
    ) -> Result<WriteOutcome, WriteError> {
        let operation_id = self.queue.enqueue(kind, target, payload.clone()).await?;

        if let Some(orchestrator) = &self.orchestrator {
            if let Err(e) = orchestrator.refresh_status().await {
                warn!(error = %e, "Could not refresh pending count");
            }
        }

        Ok(WriteOutcome::Queued {
            record: optimistic_record(payload, &operation_id),
            operation_id,
        })
    }

    /// Re-probes in the background so the monitor catches the outage
    fn suspect_outage(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        let monitor = Arc::clone(&self.connectivity);
        tokio::spawn(async move {
            monitor.refresh().await;
        });
    }
}

/// Payload augmented with the offline markers
fn optimistic_record(payload: Value, operation_id: &OperationId) -> Value {
    match payload {
        Value::Object(mut fields) => {
            fields.insert(
                OFFLINE_ID_FIELD.to_string(),
                Value::String(operation_id.to_string()),
            );
            fields.insert(PENDING_SYNC_FIELD.to_string(), Value::Bool(true));
            Value::Object(fields)
        }
        other => other,
    }
}

fn record_id(payload: &Value) -> Result<RecordId, RemoteError> {
    RecordId::from_payload(payload)
        .ok_or_else(|| RemoteError::application(None, "payload has no record id"))
}

impl std::fmt::Debug for OfflineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWriter")
            .field("timeout", &self.timeout)
            .field("force_offline", &self.is_force_offline())
            .finish()
    }
}
