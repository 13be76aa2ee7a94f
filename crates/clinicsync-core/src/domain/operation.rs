//! Queued operation entity
//!
//! An [`Operation`] is a single deferred mutation (insert/update/delete)
//! awaiting replay against the remote store. Once created its contents are
//! immutable; the only state change is the one-way `synced` flag.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{OperationId, RecordId, TargetName};

// ============================================================================
// OperationKind
// ============================================================================

/// Kind of mutation carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Stable lowercase name used for storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Whether the payload must carry the target record's id
    pub fn requires_record_id(&self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Delete)
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" | "create" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(DomainError::UnknownOperationKind(other.to_string())),
        }
    }
}

// ============================================================================
// Operation
// ============================================================================

/// A deferred mutation persisted in the local queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    kind: OperationKind,
    target: TargetName,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    synced: bool,
}

impl Operation {
    /// Builds a new pending operation created at `now`
    ///
    /// # Errors
    /// - `DomainError::InvalidPayload` if the payload is not a JSON object
    /// - `DomainError::MissingRecordId` for update/delete without an `id`
    pub fn new(
        kind: OperationKind,
        target: TargetName,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        validate_payload(kind, &target, &payload)?;

        Ok(Self {
            id: OperationId::generate(now),
            kind,
            target,
            payload,
            created_at: now,
            synced: false,
        })
    }

    /// Rebuilds an operation from storage without re-validating
    pub fn restore(
        id: OperationId,
        kind: OperationKind,
        target: TargetName,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        synced: bool,
    ) -> Self {
        Self {
            id,
            kind,
            target,
            payload,
            created_at,
            synced,
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target(&self) -> &TargetName {
        &self.target
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Id of the remote record this operation touches (update/delete)
    pub fn record_id(&self) -> Option<RecordId> {
        RecordId::from_payload(&self.payload)
    }

    /// Flips the synced flag; there is no way back to pending
    pub fn mark_synced(&mut self) {
        self.synced = true;
    }

    /// True once synced and older than `now - retention`
    pub fn is_prunable(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.synced && self.created_at < now - retention
    }
}

/// Checks the payload shape required by `kind`
pub fn validate_payload(
    kind: OperationKind,
    target: &TargetName,
    payload: &serde_json::Value,
) -> Result<(), DomainError> {
    if !payload.is_object() {
        return Err(DomainError::InvalidPayload(format!(
            "{kind} on {target} expects a JSON object"
        )));
    }

    if kind.requires_record_id() && RecordId::from_payload(payload).is_none() {
        return Err(DomainError::MissingRecordId {
            kind: kind.to_string(),
            target: target.to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Delivery bookkeeping
// ============================================================================

/// Replay failure history of a pending operation
///
/// Kept apart from the operation itself so the queued record never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub operation_id: OperationId,
    pub attempts: u32,
    pub last_error: String,
    pub last_attempt_at: DateTime<Utc>,
    /// Set once the operation will no longer be replayed automatically
    pub dead_lettered: bool,
}

/// How a replay failure should be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Count the attempt; dead-letter once `max_attempts` is reached
    Retry { max_attempts: u32 },
    /// Stop replaying right away
    DeadLetter,
}

// ============================================================================
// Read cache
// ============================================================================

/// Last-known-good payload for a `(target, key)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub target: TargetName,
    pub key: String,
    pub payload: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}
