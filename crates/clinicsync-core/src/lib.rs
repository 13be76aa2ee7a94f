//! Clinicsync Core - Domain logic for offline-first writes
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Operation`, `DeliveryFailure`, `CacheEntry`, `SyncStatus`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IOperationQueue`,
//!   `IReadCache`, `Clock`
//! - **Configuration** - YAML-backed settings shared by the daemon and CLI
//!
//! # Architecture
//!
//! The domain module contains pure types with no I/O. Ports define the trait
//! interfaces that adapter crates (`clinicsync-cache`, `clinicsync-remote`)
//! implement, and `clinicsync-sync` orchestrates through those ports only.

pub mod config;
pub mod domain;
pub mod ports;
