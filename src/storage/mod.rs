//! Storage layer for Stowage sinks.
//!
//! Provides:
//! - The connection contract every backend implements
//! - SQLite and (feature-gated) DuckDB backends
//! - The prepared statement cache that owns a sink's transaction
//! - The dialect adapter for DDL translation and parameter binding
//! - A journaling in-memory backend for tests (`test-support` feature)

pub mod cache;
pub mod connection;
pub mod dialect;
#[cfg(feature = "duckdb")]
pub mod duckdb_backend;
#[cfg(any(test, feature = "test-support"))]
pub mod recording;
pub mod sqlite;

pub use cache::{CacheError, PreparedCommand, PreparedCommandCache, TransactionId};
pub use connection::{Connection, Connector, DbError};
pub use dialect::Dialect;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store technology behind a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    #[value(name = "duckdb")]
    #[serde(rename = "duckdb")]
    DuckDb,
}

impl Backend {
    pub fn dialect(self) -> Dialect {
        match self {
            Self::Sqlite => Dialect::Sqlite,
            Self::DuckDb => Dialect::DuckDb,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().name())
    }
}

impl Connector for Backend {
    fn connect(&self, data_source: &str) -> Result<Box<dyn Connection>, DbError> {
        match self {
            Self::Sqlite => sqlite::SqliteConnector.connect(data_source),
            #[cfg(feature = "duckdb")]
            Self::DuckDb => duckdb_backend::DuckDbConnector.connect(data_source),
            #[cfg(not(feature = "duckdb"))]
            Self::DuckDb => Err(DbError::BackendUnavailable("duckdb")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_backend_connects_in_memory() {
        let conn = Backend::Sqlite.connect(":memory:").unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
    }

    #[cfg(not(feature = "duckdb"))]
    #[test]
    fn test_duckdb_backend_unavailable_without_feature() {
        assert!(matches!(
            Backend::DuckDb.connect(":memory:"),
            Err(DbError::BackendUnavailable("duckdb"))
        ));
    }

    #[test]
    fn test_backend_parses_from_cli_value() {
        assert_eq!(Backend::from_str("duckdb", true).unwrap(), Backend::DuckDb);
        assert_eq!(Backend::from_str("sqlite", true).unwrap(), Backend::Sqlite);
    }
}
