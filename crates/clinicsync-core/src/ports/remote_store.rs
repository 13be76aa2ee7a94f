//! Remote store port (driven/secondary port)
//!
//! This module defines the interface for the hosted relational store that
//! owns the clinic's records. The production adapter talks to a
//! PostgREST-compatible HTTP API, but the trait is backend-agnostic.
//!
//! ## Design Notes
//!
//! - Every method fails with [`RemoteError`], which separates
//!   connectivity failures (retry later) from application rejections
//!   (never retry).
//! - Payloads and records are plain `serde_json::Value` objects; the sync
//!   core never interprets record contents beyond the `id` field.

use std::fmt::Write as _;
use std::time::Duration;

use thiserror::Error;

use crate::domain::newtypes::{RecordId, TargetName};

// ============================================================================
// RemoteError
// ============================================================================

/// Failure of a remote store call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The store could not be reached (DNS, refused, reset, gateway down)
    #[error("Remote store unreachable: {0}")]
    Connectivity(String),

    /// The call did not complete within the allotted time
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered and rejected the request
    #[error("Remote store rejected request ({}): {message}", fmt_status(.status))]
    Application {
        /// HTTP status, when the adapter is HTTP based
        status: Option<u16>,
        /// Backend-specific error code (e.g. a SQLSTATE)
        code: Option<String>,
        message: String,
    },
}

impl RemoteError {
    /// True for failures that a later retry can fix
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_) | RemoteError::Timeout(_))
    }

    pub fn application(status: Option<u16>, message: impl Into<String>) -> Self {
        RemoteError::Application {
            status,
            code: None,
            message: message.into(),
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

// ============================================================================
// ReadFilter
// ============================================================================

/// Equality filter for remote reads
///
/// Filters are combined with AND logic. The canonical string produced by
/// [`ReadFilter::cache_key`] keys the local read cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadFilter {
    /// Column/value equality pairs
    pub eq: Vec<(String, String)>,
    /// Column to order by, ascending
    pub order_by: Option<String>,
    pub limit: Option<u32>,
}

impl ReadFilter {
    /// Creates an empty filter (matches every record)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq.push((column.into(), value.into()));
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter matching a single record by id
    pub fn by_id(id: &RecordId) -> Self {
        Self::new().with_eq("id", id.as_str())
    }

    /// Canonical representation, independent of insertion order
    pub fn cache_key(&self) -> String {
        let mut pairs = self.eq.clone();
        pairs.sort();

        let mut key = String::new();
        for (column, value) in &pairs {
            if !key.is_empty() {
                key.push('&');
            }
            let _ = write!(key, "{column}=eq.{value}");
        }
        if let Some(order) = &self.order_by {
            let _ = write!(key, "{}order={order}", separator(&key));
        }
        if let Some(limit) = self.limit {
            let _ = write!(key, "{}limit={limit}", separator(&key));
        }
        if key.is_empty() {
            key.push('*');
        }
        key
    }
}

fn separator(key: &str) -> &'static str {
    if key.is_empty() {
        ""
    } else {
        "&"
    }
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the hosted data store
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Creates a record and returns the stored representation
    async fn create(
        &self,
        target: &TargetName,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Updates the record identified by `id` with the fields in `payload`
    async fn update(
        &self,
        target: &TargetName,
        id: &RecordId,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Deletes the record identified by `id`, returning what was removed
    async fn delete(
        &self,
        target: &TargetName,
        id: &RecordId,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Reads records matching `filter`
    async fn read(
        &self,
        target: &TargetName,
        filter: &ReadFilter,
    ) -> Result<Vec<serde_json::Value>, RemoteError>;

    /// Lightweight reachability check (reads at most one row)
    async fn probe(&self) -> Result<(), RemoteError>;
}
