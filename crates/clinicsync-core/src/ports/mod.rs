//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync core depends on; their implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Hosted relational store (create/update/delete/read/probe)
//! - [`IOperationQueue`] - Durable local queue of pending operations
//! - [`IReadCache`] - Best-effort last-known-good read cache
//! - [`Clock`] - Source of "now", swappable in tests
//!
//! Unlike adapter-internal code, these ports return typed errors: callers
//! must tell a connectivity failure from an application rejection from a
//! local storage failure, and each one is handled differently.

pub mod clock;
pub mod operation_queue;
pub mod remote_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use operation_queue::{IOperationQueue, IReadCache, StorageError};
pub use remote_store::{IRemoteStore, ReadFilter, RemoteError};
