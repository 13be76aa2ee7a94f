//! Domain entities and business rules
//!
//! This module contains the core domain types for clinicsync:
//! - Newtypes for operation ids, remote table names and record ids
//! - The queued `Operation` record and its delivery bookkeeping
//! - Process-wide sync status and pass reports
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod operation;
pub mod status;

pub use errors::DomainError;
pub use newtypes::{OperationId, RecordId, TargetName};
pub use operation::{CacheEntry, DeliveryFailure, FailureDisposition, Operation, OperationKind};
pub use status::{SkipReason, SyncOutcome, SyncReport, SyncStatus};
