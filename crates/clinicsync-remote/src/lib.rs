//! clinicsync Remote - HTTP adapter for the hosted clinic data store
//!
//! Provides an async client for a PostgREST-compatible REST API (the
//! interface exposed by Supabase and plain PostgREST deployments):
//! - Row inserts, updates and deletes returning the stored representation
//! - Equality-filtered reads with ordering and limits
//! - A one-row probe used for reachability checks
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client and response classification
//! - [`provider`] - `IRemoteStore` implementation on top of the client

pub mod client;
pub mod provider;

pub use client::RestClient;
pub use provider::RestRemoteStore;
