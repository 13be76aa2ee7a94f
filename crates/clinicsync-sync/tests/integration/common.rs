//! Shared fakes for sync integration tests
//!
//! [`FakeRemote`] is an in-process remote store whose reachability and
//! per-call failures are scripted by the test. [`MemoryQueue`] is an
//! in-memory queue and read cache used where a paused tokio clock rules
//! out SQLite.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;

use clinicsync_cache::{DatabasePool, SqliteOperationQueue};
use clinicsync_core::domain::{
    newtypes::{OperationId, RecordId, TargetName},
    CacheEntry, DeliveryFailure, FailureDisposition, Operation, OperationKind,
};
use clinicsync_core::ports::{
    Clock, IOperationQueue, IReadCache, IRemoteStore, ManualClock, ReadFilter, RemoteError,
    StorageError,
};
use clinicsync_sync::{
    ConnectivityMonitor, ConnectivitySettings, OfflineWriter, SyncOrchestrator, SyncSettings,
};

pub fn table(name: &str) -> TargetName {
    TargetName::new(name).expect("valid table name")
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub fn down() -> RemoteError {
    RemoteError::Connectivity("connection refused".into())
}

// ============================================================================
// FakeRemote
// ============================================================================

/// One mutation seen by the fake, in call order
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub kind: OperationKind,
    pub target: String,
    pub payload: Value,
}

/// Scriptable in-process remote store
#[derive(Default)]
pub struct FakeRemote {
    online: AtomicBool,
    /// Errors returned by the next mutations, one per call
    failures: Mutex<VecDeque<RemoteError>>,
    /// Rows stored per table
    rows: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<Vec<Call>>,
    probes: AtomicUsize,
    next_id: AtomicU64,
    /// When set, mutations never complete
    hang: AtomicBool,
    /// When set, mutations wait for a notification before answering
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn online() -> Arc<Self> {
        let remote = Self::default();
        remote.set_online(true);
        Arc::new(remote)
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Makes the next mutation fail with `err`
    pub fn fail_next(&self, err: RemoteError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Holds every mutation until the returned handle is notified
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn rows(&self, target: &str) -> Vec<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    async fn mutation(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: Value,
    ) -> Result<(), RemoteError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(down());
        }

        self.calls.lock().unwrap().push(Call {
            kind,
            target: target.to_string(),
            payload,
        });

        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn same_id(row: &Value, id: &RecordId) -> bool {
    RecordId::from_payload(row).as_ref() == Some(id)
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemote {
    async fn create(&self, target: &TargetName, payload: &Value) -> Result<Value, RemoteError> {
        self.mutation(OperationKind::Insert, target, payload.clone())
            .await?;

        let mut row = payload.clone();
        if row.get("id").is_none() {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            row["id"] = json!(id);
        }
        self.rows
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        target: &TargetName,
        id: &RecordId,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        self.mutation(OperationKind::Update, target, payload.clone())
            .await?;

        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(target.to_string()).or_default();
        match table.iter_mut().find(|row| same_id(row, id)) {
            Some(row) => {
                if let (Some(row), Some(changes)) = (row.as_object_mut(), payload.as_object()) {
                    for (k, v) in changes {
                        row.insert(k.clone(), v.clone());
                    }
                }
                Ok(row.clone())
            }
            None => Ok(Value::Null),
        }
    }

    async fn delete(&self, target: &TargetName, id: &RecordId) -> Result<Value, RemoteError> {
        self.mutation(OperationKind::Delete, target, json!({ "id": id.as_str() }))
            .await?;

        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(target.to_string()).or_default();
        match table.iter().position(|row| same_id(row, id)) {
            Some(index) => Ok(table.remove(index)),
            None => Ok(Value::Null),
        }
    }

    async fn read(&self, target: &TargetName, filter: &ReadFilter) -> Result<Vec<Value>, RemoteError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(down());
        }
        let matches = |row: &Value| {
            filter.eq.iter().all(|(column, value)| match row.get(column) {
                Some(Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            })
        };
        Ok(self
            .rows(target.as_str())
            .into_iter()
            .filter(|row| matches(row))
            .collect())
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(down())
        }
    }
}

// ============================================================================
// MemoryQueue
// ============================================================================

#[derive(Default)]
struct MemoryState {
    operations: Vec<Operation>,
    failures: HashMap<OperationId, DeliveryFailure>,
    cache: HashMap<(String, String), CacheEntry>,
}

/// In-memory queue and read cache with the same semantics as the SQLite one
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    /// When set, every queue call fails with `StorageError::Unavailable`
    broken: AtomicBool,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            broken: AtomicBool::new(false),
        })
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("disk unplugged".into()))
        } else {
            Ok(())
        }
    }

    fn is_pending(state: &MemoryState, op: &Operation) -> bool {
        !op.is_synced()
            && !state
                .failures
                .get(op.id())
                .map(|f| f.dead_lettered)
                .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl IOperationQueue for MemoryQueue {
    async fn enqueue(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: Value,
    ) -> Result<OperationId, StorageError> {
        self.check()?;
        let op = Operation::new(kind, target.clone(), payload, self.clock.now())?;
        let id = op.id().clone();
        self.state.lock().unwrap().operations.push(op);
        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<Operation>, StorageError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut pending: Vec<Operation> = state
            .operations
            .iter()
            .filter(|op| Self::is_pending(&state, op))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        pending.sort_by_key(|op| op.created_at());
        Ok(pending)
    }

    async fn count_pending(&self) -> Result<u64, StorageError> {
        Ok(self.list_pending().await?.len() as u64)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StorageError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.operations.iter().find(|op| op.id() == id).cloned())
    }

    async fn mark_synced(&self, id: &OperationId) -> Result<(), StorageError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(op) = state.operations.iter_mut().find(|op| op.id() == id) {
            op.mark_synced();
        }
        state.failures.remove(id);
        Ok(())
    }

    async fn prune_synced(&self, retention: chrono::Duration) -> Result<u64, StorageError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let before = state.operations.len();
        state.operations.retain(|op| !op.is_prunable(now, retention));
        Ok((before - state.operations.len()) as u64)
    }

    async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<DeliveryFailure, StorageError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let failure = state
            .failures
            .entry(id.clone())
            .or_insert_with(|| DeliveryFailure {
                operation_id: id.clone(),
                attempts: 0,
                last_error: String::new(),
                last_attempt_at: now,
                dead_lettered: false,
            });
        failure.attempts += 1;
        failure.last_error = error.to_string();
        failure.last_attempt_at = now;
        failure.dead_lettered = match disposition {
            FailureDisposition::DeadLetter => true,
            FailureDisposition::Retry { max_attempts } => failure.attempts >= max_attempts,
        };
        Ok(failure.clone())
    }

    async fn list_dead_letters(&self) -> Result<Vec<(Operation, DeliveryFailure)>, StorageError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .operations
            .iter()
            .filter_map(|op| {
                state
                    .failures
                    .get(op.id())
                    .filter(|f| f.dead_lettered)
                    .map(|f| (op.clone(), f.clone()))
            })
            .collect())
    }

    async fn requeue_dead_letter(&self, id: &OperationId) -> Result<bool, StorageError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let dead = state
            .failures
            .get(id)
            .map(|f| f.dead_lettered)
            .unwrap_or(false);
        if dead {
            state.failures.remove(id);
        }
        Ok(dead)
    }
}

#[async_trait::async_trait]
impl IReadCache for MemoryQueue {
    async fn cache_write(
        &self,
        target: &TargetName,
        key: &str,
        payload: &Value,
    ) -> Result<(), StorageError> {
        self.check()?;
        let entry = CacheEntry {
            target: target.clone(),
            key: key.to_string(),
            payload: payload.clone(),
            cached_at: self.clock.now(),
        };
        self.state
            .lock()
            .unwrap()
            .cache
            .insert((target.to_string(), key.to_string()), entry);
        Ok(())
    }

    async fn cache_read(
        &self,
        target: &TargetName,
        key: &str,
    ) -> Result<Option<CacheEntry>, StorageError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .cache
            .get(&(target.to_string(), key.to_string()))
            .cloned())
    }

    async fn prune_cache(&self, max_age: chrono::Duration) -> Result<u64, StorageError> {
        self.check()?;
        let cutoff = self.clock.now() - max_age;
        let mut state = self.state.lock().unwrap();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.cached_at >= cutoff);
        Ok((before - state.cache.len()) as u64)
    }
}

// ============================================================================
// Harnesses
// ============================================================================

pub fn fast_probe_settings() -> ConnectivitySettings {
    ConnectivitySettings {
        probe_retries: 0,
        probe_retry_delay: Duration::from_millis(10),
    }
}

pub fn short_timeout_settings() -> SyncSettings {
    SyncSettings {
        operation_timeout: Duration::from_millis(200),
        max_attempts: 3,
        ..SyncSettings::default()
    }
}

/// Everything a sync test needs, wired around one queue implementation
pub struct Harness<Q> {
    pub remote: Arc<FakeRemote>,
    pub queue: Arc<Q>,
    pub clock: Arc<ManualClock>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl<Q> Harness<Q>
where
    Q: IOperationQueue + IReadCache + 'static,
{
    fn wire(remote: Arc<FakeRemote>, queue: Arc<Q>, clock: Arc<ManualClock>, settings: SyncSettings) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            fast_probe_settings(),
        ));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                queue.clone(),
                queue.clone(),
                remote.clone(),
                monitor.clone(),
                settings,
            )
            .with_clock(clock.clone()),
        );
        Self {
            remote,
            queue,
            clock,
            monitor,
            orchestrator,
        }
    }

    /// Interceptor sharing this harness's queue, cache and orchestrator
    pub fn writer(&self) -> OfflineWriter {
        OfflineWriter::new(
            self.remote.clone(),
            self.queue.clone(),
            self.queue.clone(),
            self.monitor.clone(),
        )
        .with_timeout(Duration::from_millis(200))
        .with_orchestrator(self.orchestrator.clone())
    }
}

/// Harness over a fresh in-memory SQLite queue
pub async fn sqlite_harness(remote: Arc<FakeRemote>, settings: SyncSettings) -> Harness<SqliteOperationQueue> {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let clock = Arc::new(ManualClock::new(start_time()));
    let queue = Arc::new(SqliteOperationQueue::with_clock(
        pool.pool().clone(),
        clock.clone(),
    ));
    Harness::wire(remote, queue, clock, settings)
}

/// Harness over [`MemoryQueue`], safe under a paused tokio clock
pub fn memory_harness(remote: Arc<FakeRemote>, settings: SyncSettings) -> Harness<MemoryQueue> {
    let clock = Arc::new(ManualClock::new(start_time()));
    let queue = MemoryQueue::new(clock.clone());
    Harness::wire(remote, queue, clock, settings)
}
