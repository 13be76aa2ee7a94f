//! clinicsync Cache - Local persistence for offline work
//!
//! SQLite-based storage for:
//! - The durable queue of operations waiting for replay
//! - Replay failure history and dead letters
//! - The last-known-good read cache
//!
//! ## Architecture
//!
//! This crate implements the `IOperationQueue` and `IReadCache` ports from
//! `clinicsync-core` using SQLite as the storage backend. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteOperationQueue`] - `IOperationQueue` + `IReadCache` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use clinicsync_cache::{DatabasePool, SqliteOperationQueue};
//!
//! # async fn example() -> Result<(), clinicsync_cache::CacheError> {
//! let pool = DatabasePool::new(Path::new("/var/lib/clinicsync/offline.db")).await?;
//! let queue = SqliteOperationQueue::new(pool.pool().clone());
//! // Use queue as IOperationQueue / IReadCache...
//! # Ok(())
//! # }
//! ```

use clinicsync_core::ports::StorageError;

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteOperationQueue;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<CacheError> for StorageError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::ConnectionFailed(msg) | CacheError::MigrationFailed(msg) => {
                StorageError::Unavailable(msg)
            }
            CacheError::QueryFailed(msg) => StorageError::QueryFailed(msg),
            CacheError::SerializationError(msg) => StorageError::Corrupt(msg),
        }
    }
}
