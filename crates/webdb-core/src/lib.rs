//! webdb-core: per-origin database quota and lifecycle tracking
//!
//! Records which logical databases exist for which origins, enforces a
//! storage quota per origin, counts live connections, and defers deletion of
//! databases that are still open until their last connection closes.
//!
//! # Architecture
//!
//! ```text
//! open / modify / close ──► DatabaseTracker ──► ConnectionRegistry
//!                                │
//!                                ├──► MetadataStore (SQLite) + DatabaseLayout
//!                                ├──► OriginInfoCache
//!                                ├──► DeletionScheduler ──► DeletionCallback
//!                                └──► TrackerObserver fan-out
//! ```
//!
//! # Modules
//!
//! - `tracker`: Tracker façade orchestrating everything below
//! - `metadata`: Durable database rows and quota overrides with migrations
//! - `connections`: Open-connection multiset
//! - `origin_cache`: Memoized per-origin size/quota aggregates
//! - `deletion`: Deferred deletion and batched completion
//! - `observer`: Lifecycle observer interface
//! - `layout`: On-disk layout of a profile's databases directory
//! - `profile_lock`: Advisory lock shared by trackers and maintenance
//! - `maintenance`: Offline clear-local-state wipe
//! - `usage`: Usage aggregation across storage types
//! - `origin`: Origin and database identity types
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//! - `error`: Error types with remediation guidance
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod connections;
pub mod deletion;
pub mod error;
pub mod layout;
pub mod logging;
pub mod maintenance;
pub mod metadata;
pub mod observer;
pub mod origin;
pub mod origin_cache;
pub mod profile_lock;
pub mod tracker;
pub mod usage;

pub use connections::ConnectionRegistry;
pub use deletion::{BatchId, BatchResult, DeletionCallback};
pub use error::{ConfigError, Error, Result, StorageError};
pub use observer::{ObserverId, TrackerObserver};
pub use origin::{DatabaseDetails, DatabaseKey, DatabaseSet, OriginId};
pub use origin_cache::CachedOriginInfo;
pub use tracker::{DatabaseTracker, DeleteStatus, OpenedDatabase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
