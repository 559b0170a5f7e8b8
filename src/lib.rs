//! Stowage: batched, transactional ingestion of record feeds into relational stores.
//!
//! A feed produces records grouped by source file. Each configured sink gets its
//! own bounded queue, dedicated writer thread and prepared statement cache, and
//! commits once per source file. A coordinator fans the same feed out to a
//! primary sink and any number of secondary sinks, each with its own failure policy.
//!
//! # Architecture
//!
//! - **Backpressure**: the feed reader blocks once a sink's queue holds `throttle_size` items
//! - **Lazy DDL**: tables are created the first time a record shape is seen in a run
//! - **File-sized transactions**: a file boundary commits and rotates the transaction
//! - **Heterogeneous sinks**: canonical SQLite DDL is translated for other dialects
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`feed`]: Read results, replayable feed sources, JSON-lines feed files
//! - [`observability`]: Metrics and tracing setup
//! - [`pipeline`]: Queue, ingestion worker, single-sink operator, multi-sink coordinator
//! - [`schema`]: Table descriptors, record values and canonical SQL builders
//! - [`storage`]: Connection contract, backends, statement cache, dialect adapter

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::cache::CacheError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod feed;
pub mod observability;
pub mod pipeline;
pub mod schema;
pub mod storage;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) run ID.
///
/// Every operator run gets one so that log lines from the producer and the
/// writer thread of the same sink can be correlated.
///
/// # Example
///
/// ```
/// let id = stowage::generate_run_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}
