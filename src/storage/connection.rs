//! Database connection contract shared by every sink backend.

use thiserror::Error;

use super::dialect::Dialect;
use crate::schema::SqlValue;

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "duckdb")]
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("a transaction is already active on this connection")]
    TransactionActive,

    #[error("no active transaction on this connection")]
    NoTransaction,

    #[error("statement parameter ':{0}' has no bound value")]
    UnboundParameter(String),

    #[error("backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),

    #[error("{0}")]
    Backend(String),
}

/// A live connection to one relational store.
///
/// Implementations keep at most one transaction open at a time. Commands are
/// executed with named parameters (names carry no `:` prefix); a backend that
/// only understands positional parameters rewrites them with
/// [`bind_positional`](super::dialect::bind_positional).
pub trait Connection: Send {
    /// SQL dialect DDL must be written in for this store.
    fn dialect(&self) -> Dialect;

    fn begin(&mut self) -> Result<(), DbError>;

    fn commit(&mut self) -> Result<(), DbError>;

    fn rollback(&mut self) -> Result<(), DbError>;

    /// Execute a non-query command, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize, DbError>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn begin(&mut self) -> Result<(), DbError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), DbError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        (**self).rollback()
    }

    fn execute(&mut self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize, DbError> {
        (**self).execute(sql, params)
    }
}

/// Opens connections from a data-source string.
pub trait Connector: Send + Sync {
    fn connect(&self, data_source: &str) -> Result<Box<dyn Connection>, DbError>;
}
