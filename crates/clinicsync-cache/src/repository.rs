//! SQLite implementation of IOperationQueue and IReadCache
//!
//! This module provides the concrete SQLite-based implementation of the
//! queue and read cache ports defined in clinicsync-core. It handles domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                                     |
//! |------------------|----------|----------------------------------------------|
//! | OperationId      | TEXT     | `.as_str()` / `FromStr`                      |
//! | OperationKind    | TEXT     | `.as_str()` / `FromStr`                      |
//! | TargetName       | TEXT     | `.as_str()` / `TargetName::new()`            |
//! | serde_json::Value| TEXT     | `serde_json::to_string` / `from_str`         |
//! | DateTime<Utc>    | TEXT     | RFC 3339, microseconds, `Z` suffix           |
//! | bool             | INTEGER  | 0 / 1                                        |
//!
//! Timestamps are written with a fixed width so that text comparison in SQL
//! matches chronological order.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use clinicsync_core::domain::{
    newtypes::{OperationId, TargetName},
    CacheEntry, DeliveryFailure, FailureDisposition, Operation, OperationKind,
};
use clinicsync_core::ports::{Clock, IOperationQueue, IReadCache, StorageError, SystemClock};

use crate::CacheError;

/// SQLite-based implementation of the queue and read cache ports
///
/// Every write is a single statement or transaction committed before the
/// method returns.
pub struct SqliteOperationQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteOperationQueue {
    /// Creates a queue backed by `pool`, stamping records with system time
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Creates a queue that reads "now" from `clock`
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn to_json_text(value: &serde_json::Value) -> Result<String, CacheError> {
    serde_json::to_string(value)
        .map_err(|e| CacheError::SerializationError(format!("Failed to serialize payload: {}", e)))
}

fn from_json_text(s: &str) -> Result<serde_json::Value, CacheError> {
    serde_json::from_str(s)
        .map_err(|e| CacheError::SerializationError(format!("Failed to parse payload: {}", e)))
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct an Operation from a row of the `operations` table
fn operation_from_row(row: &SqliteRow) -> Result<Operation, CacheError> {
    let id_str: String = row.try_get("id")?;
    let kind_str: String = row.try_get("kind")?;
    let target_str: String = row.try_get("target")?;
    let payload_str: String = row.try_get("payload")?;
    let created_at_str: String = row.try_get("created_at")?;
    let synced: i64 = row.try_get("synced")?;

    let id = id_str
        .parse::<OperationId>()
        .map_err(|e| CacheError::SerializationError(e.to_string()))?;
    let kind = kind_str
        .parse::<OperationKind>()
        .map_err(|e| CacheError::SerializationError(e.to_string()))?;
    let target =
        TargetName::new(target_str).map_err(|e| CacheError::SerializationError(e.to_string()))?;

    Ok(Operation::restore(
        id,
        kind,
        target,
        from_json_text(&payload_str)?,
        parse_datetime(&created_at_str)?,
        synced != 0,
    ))
}

/// Reconstruct a DeliveryFailure from a row of `operation_failures`
fn failure_from_row(row: &SqliteRow) -> Result<DeliveryFailure, CacheError> {
    let id_str: String = row.try_get("operation_id")?;
    let attempts: i64 = row.try_get("attempts")?;
    let last_error: String = row.try_get("last_error")?;
    let last_attempt_at: String = row.try_get("last_attempt_at")?;
    let dead_lettered: i64 = row.try_get("dead_lettered")?;

    Ok(DeliveryFailure {
        operation_id: id_str
            .parse::<OperationId>()
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error,
        last_attempt_at: parse_datetime(&last_attempt_at)?,
        dead_lettered: dead_lettered != 0,
    })
}

fn cache_entry_from_row(row: &SqliteRow) -> Result<CacheEntry, CacheError> {
    let target: String = row.try_get("target")?;
    let key: String = row.try_get("key")?;
    let payload: String = row.try_get("payload")?;
    let cached_at: String = row.try_get("cached_at")?;

    Ok(CacheEntry {
        target: TargetName::new(target)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        key,
        payload: from_json_text(&payload)?,
        cached_at: parse_datetime(&cached_at)?,
    })
}

// ============================================================================
// Queries
// ============================================================================

const SELECT_PENDING: &str = "SELECT o.id, o.kind, o.target, o.payload, o.created_at, o.synced \
     FROM operations o \
     LEFT JOIN operation_failures f ON f.operation_id = o.id \
     WHERE o.synced = 0 AND COALESCE(f.dead_lettered, 0) = 0 \
     ORDER BY o.created_at ASC, o.seq ASC";

const COUNT_PENDING: &str = "SELECT COUNT(*) FROM operations o \
     LEFT JOIN operation_failures f ON f.operation_id = o.id \
     WHERE o.synced = 0 AND COALESCE(f.dead_lettered, 0) = 0";

impl SqliteOperationQueue {
    async fn insert_operation(&self, op: &Operation) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO operations (id, kind, target, payload, created_at, synced) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(op.id().as_str())
        .bind(op.kind().as_str())
        .bind(op.target().as_str())
        .bind(to_json_text(op.payload())?)
        .bind(format_datetime(op.created_at()))
        .bind(i64::from(op.is_synced()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            operation_id = %op.id(),
            kind = %op.kind(),
            table = %op.target(),
            "Enqueued operation"
        );
        Ok(())
    }

    async fn fetch_pending(&self) -> Result<Vec<Operation>, CacheError> {
        let rows = sqlx::query(SELECT_PENDING).fetch_all(&self.pool).await?;
        rows.iter().map(operation_from_row).collect()
    }

    async fn fetch_pending_count(&self) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar(COUNT_PENDING)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_operation(&self, id: &OperationId) -> Result<Option<Operation>, CacheError> {
        let row = sqlx::query(
            "SELECT id, kind, target, payload, created_at, synced FROM operations WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(operation_from_row).transpose()
    }

    async fn set_synced(&self, id: &OperationId) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE operations SET synced = 1 WHERE id = ? AND synced = 0")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM operation_failures WHERE operation_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if result.rows_affected() > 0 {
            tracing::trace!(operation_id = %id, "Marked operation synced");
        }
        Ok(())
    }

    async fn delete_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM operations WHERE synced = 1 AND created_at < ?")
            .bind(format_datetime(cutoff))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        tracing::debug!(deleted, cutoff = %cutoff, "Pruned synced operations");
        Ok(deleted)
    }

    async fn upsert_failure(
        &self,
        id: &OperationId,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<DeliveryFailure, CacheError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT attempts FROM operation_failures WHERE operation_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let attempts = u32::try_from(previous.unwrap_or(0))
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let dead_lettered = match disposition {
            FailureDisposition::DeadLetter => true,
            FailureDisposition::Retry { max_attempts } => attempts >= max_attempts,
        };

        sqlx::query(
            "INSERT INTO operation_failures \
             (operation_id, attempts, last_error, last_attempt_at, dead_lettered) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (operation_id) DO UPDATE SET \
             attempts = excluded.attempts, \
             last_error = excluded.last_error, \
             last_attempt_at = excluded.last_attempt_at, \
             dead_lettered = excluded.dead_lettered",
        )
        .bind(id.as_str())
        .bind(i64::from(attempts))
        .bind(error)
        .bind(format_datetime(now))
        .bind(i64::from(dead_lettered))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::trace!(operation_id = %id, attempts, dead_lettered, "Recorded replay failure");

        Ok(DeliveryFailure {
            operation_id: id.clone(),
            attempts,
            last_error: error.to_string(),
            last_attempt_at: now,
            dead_lettered,
        })
    }

    async fn fetch_dead_letters(&self) -> Result<Vec<(Operation, DeliveryFailure)>, CacheError> {
        let rows = sqlx::query(
            "SELECT o.id, o.kind, o.target, o.payload, o.created_at, o.synced, \
             f.operation_id, f.attempts, f.last_error, f.last_attempt_at, f.dead_lettered \
             FROM operations o \
             JOIN operation_failures f ON f.operation_id = o.id \
             WHERE f.dead_lettered = 1 AND o.synced = 0 \
             ORDER BY o.created_at ASC, o.seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((operation_from_row(row)?, failure_from_row(row)?)))
            .collect()
    }

    async fn clear_dead_letter(&self, id: &OperationId) -> Result<bool, CacheError> {
        let result = sqlx::query(
            "DELETE FROM operation_failures WHERE operation_id = ? AND dead_lettered = 1",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            tracing::info!(operation_id = %id, "Requeued dead-lettered operation");
        }
        Ok(requeued)
    }

    async fn upsert_cache(
        &self,
        target: &TargetName,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT OR REPLACE INTO read_cache (target, key, payload, cached_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(target.as_str())
        .bind(key)
        .bind(to_json_text(payload)?)
        .bind(format_datetime(self.clock.now()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(table = %target, key, "Cached read result");
        Ok(())
    }

    async fn fetch_cache(
        &self,
        target: &TargetName,
        key: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query(
            "SELECT target, key, payload, cached_at FROM read_cache WHERE target = ? AND key = ?",
        )
        .bind(target.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(cache_entry_from_row).transpose()
    }

    async fn delete_cache_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM read_cache WHERE cached_at < ?")
            .bind(format_datetime(cutoff))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        tracing::debug!(deleted, cutoff = %cutoff, "Pruned read cache");
        Ok(deleted)
    }
}

// ============================================================================
// IOperationQueue implementation
// ============================================================================

#[async_trait::async_trait]
impl IOperationQueue for SqliteOperationQueue {
    async fn enqueue(
        &self,
        kind: OperationKind,
        target: &TargetName,
        payload: serde_json::Value,
    ) -> Result<OperationId, StorageError> {
        let op = Operation::new(kind, target.clone(), payload, self.clock.now())?;
        self.insert_operation(&op).await?;
        Ok(op.id().clone())
    }

    async fn list_pending(&self) -> Result<Vec<Operation>, StorageError> {
        Ok(self.fetch_pending().await?)
    }

    async fn count_pending(&self) -> Result<u64, StorageError> {
        Ok(self.fetch_pending_count().await?)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StorageError> {
        Ok(self.fetch_operation(id).await?)
    }

    async fn mark_synced(&self, id: &OperationId) -> Result<(), StorageError> {
        Ok(self.set_synced(id).await?)
    }

    async fn prune_synced(&self, retention: Duration) -> Result<u64, StorageError> {
        let cutoff = self.clock.now() - retention;
        Ok(self.delete_synced_before(cutoff).await?)
    }

    async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<DeliveryFailure, StorageError> {
        Ok(self.upsert_failure(id, error, disposition).await?)
    }

    async fn list_dead_letters(&self) -> Result<Vec<(Operation, DeliveryFailure)>, StorageError> {
        Ok(self.fetch_dead_letters().await?)
    }

    async fn requeue_dead_letter(&self, id: &OperationId) -> Result<bool, StorageError> {
        Ok(self.clear_dead_letter(id).await?)
    }
}

// ============================================================================
// IReadCache implementation
// ============================================================================

#[async_trait::async_trait]
impl IReadCache for SqliteOperationQueue {
    async fn cache_write(
        &self,
        target: &TargetName,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StorageError> {
        Ok(self.upsert_cache(target, key, payload).await?)
    }

    async fn cache_read(
        &self,
        target: &TargetName,
        key: &str,
    ) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.fetch_cache(target, key).await?)
    }

    async fn prune_cache(&self, max_age: Duration) -> Result<u64, StorageError> {
        let cutoff = self.clock.now() - max_age;
        Ok(self.delete_cache_before(cutoff).await?)
    }
}
