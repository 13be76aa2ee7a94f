//! Integration tests for clinicsync-sync
//!
//! Drives the orchestrator, interceptor and scheduler against an in-process
//! fake remote store, using either the SQLite queue or an in-memory one.

mod common;

mod test_interceptor;
mod test_scheduler;
