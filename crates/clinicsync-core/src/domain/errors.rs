//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! mostly validation failures raised while building queued operations.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Operation id does not follow the `<millis>-<suffix>` format
    #[error("Invalid operation id: {0}")]
    InvalidOperationId(String),

    /// Remote table name is empty or contains unsupported characters
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Payload is not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Update and delete payloads must identify the record they touch
    #[error("Payload for {kind} on {target} is missing the record id")]
    MissingRecordId {
        /// Operation kind that required the id
        kind: String,
        /// Remote table the operation was aimed at
        target: String,
    },

    /// Stored or user-supplied operation kind is not insert/update/delete
    #[error("Unknown operation kind: {0}")]
    UnknownOperationKind(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
