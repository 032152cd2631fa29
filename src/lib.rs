//! Cistern: a multi-tenant context sink backed by PostgreSQL.
//!
//! Cistern takes batches of entity change notifications and persists them into
//! per-tenant databases, schemas and tables, creating them on demand.
//!
//! # Architecture
//!
//! - **Tenant isolation**: service → database, service-path → schema, destination → table
//! - **Two layouts**: row mode (one row per attribute) and column mode (one row per event)
//! - **Bounded connection cache**: one live handle per database, LRU eviction
//! - **Two insert styles**: the legacy literal SQL text and a parameterized path
//!
//! # Modules
//!
//! - [`aggregator`]: Row/column aggregation of a destination's events
//! - [`cache`]: Per-database connection cache
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Error taxonomy surfaced to callers
//! - [`gateway`]: DDL and DML issued against the store
//! - [`ingest`]: JSON-lines intake with batch accumulation
//! - [`model`]: Events, attributes and batches
//! - [`naming`]: Identifier derivation and length checks
//! - [`observability`]: Metrics and tracing setup
//! - [`router`]: Per-destination persistence driver
//! - [`store`]: Store capability and its backends
//! - [`worker`]: Dedicated sink thread

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // store::StoreError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod naming;
pub mod observability;
pub mod router;
pub mod store;
pub mod worker;

pub use error::SinkError;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) batch ID.
///
/// Batch IDs only correlate log lines of one flush; they are never persisted.
///
/// # Example
///
/// ```
/// let id = cistern::generate_batch_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_batch_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
