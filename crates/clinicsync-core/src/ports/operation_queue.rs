//! Local queue and read cache ports (driven/secondary ports)
//!
//! The operation queue is the only shared mutable resource of the sync
//! core. Implementations must persist every write before returning so a
//! process restart never loses a queued operation.
//!
//! ## Design Notes
//!
//! - Storage failures surface as [`StorageError`]; the queue never retries
//!   on its own, retry policy belongs to the orchestrator.
//! - `mark_synced` is idempotent: unknown or already-synced ids are no-ops.
//! - The read cache is best-effort; callers log its failures and move on.

use chrono::Duration;
use thiserror::Error;

use crate::domain::{
    newtypes::{OperationId, TargetName},
    CacheEntry, DeliveryFailure, FailureDisposition, Operation, OperationKind,
};

// ============================================================================
// StorageError
// ============================================================================

/// Failure of the local persistent store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be opened or reached
    #[error("Local storage unavailable: {0}")]
    Unavailable(String),

    /// A read or write failed (quota, locking, I/O)
    #[error("Local storage query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be decoded back into a domain type
    #[error("Corrupt local record: {0}")]
    Corrupt(String),

    /// The caller supplied an operation the queue refuses to store
    #[error("Rejected operation: {0}")]
    Rejected(#[from] crate::domain::DomainError),
}

// ============================================================================
// IOperationQueue trait
// ============================================================================

/// Port trait for the durable queue of deferred mutations
#[async_trait::async_trait]
pub trait IOperationQueue: Send + Sync {
    /// Persists a new pending operation and returns its id
    async fn enqueue(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: serde_json::Value,
    ) -> Result<OperationId, StorageError>;

    /// Returns every operation still waiting for replay
    ///
    /// Dead-lettered operations are excluded. Order is FIFO by creation
    /// time, ties broken by insertion order.
    async fn list_pending(&self) -> Result<Vec<Operation>, StorageError>;

    /// Number of operations `list_pending` would return
    async fn count_pending(&self) -> Result<u64, StorageError>;

    /// Looks up an operation regardless of its state
    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StorageError>;

    /// Flags an operation as replayed; unknown ids are ignored
    async fn mark_synced(&self, id: &OperationId) -> Result<(), StorageError>;

    /// Deletes synced operations created more than `retention` ago
    ///
    /// Returns the number of deleted operations.
    async fn prune_synced(&self, retention: Duration) -> Result<u64, StorageError>;

    /// Records a failed replay attempt
    async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<DeliveryFailure, StorageError>;

    /// Operations that stopped being replayed, with their failure history
    async fn list_dead_letters(&self) -> Result<Vec<(Operation, DeliveryFailure)>, StorageError>;

    /// Puts a dead-lettered operation back in the pending set
    ///
    /// Returns `false` if the id is not dead-lettered.
    async fn requeue_dead_letter(&self, id: &OperationId) -> Result<bool, StorageError>;
}

// ============================================================================
// IReadCache trait
// ============================================================================

/// Port trait for the best-effort read cache
#[async_trait::async_trait]
pub trait IReadCache: Send + Sync {
    /// Stores (or replaces) the payload cached under `(target, key)`
    async fn cache_write(
        &self,
        target: &TargetName,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Returns the cached payload for `(target, key)`, if any
    async fn cache_read(
        &self,
        target: &TargetName,
        key: &str,
    ) -> Result<Option<CacheEntry>, StorageError>;

    /// Deletes entries cached more than `max_age` ago
    async fn prune_cache(&self, max_age: Duration) -> Result<u64, StorageError>;
}
