//! DuckDB backend (enabled with the `duckdb` cargo feature).
//!
//! DuckDB takes DDL in its own dialect and positional parameters, so DDL is
//! translated by the worker and DML placeholders are rewritten here.

use duckdb::params_from_iter;
use duckdb::types::{ToSql, ToSqlOutput, Value};
use std::path::Path;

use super::connection::{Connection, Connector, DbError};
use super::dialect::{bind_positional, Dialect};
use crate::schema::SqlValue;

/// Owned DuckDB value for one bound parameter.
struct DuckValue(SqlValue);

impl ToSql for DuckValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match &self.0 {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(v) => Value::BigInt(*v),
            SqlValue::Real(v) => Value::Double(*v),
            SqlValue::Text(v) => Value::Text(v.clone()),
            SqlValue::Blob(v) => Value::Blob(v.clone()),
        }))
    }
}

/// A sink connection backed by a DuckDB database file.
pub struct DuckDbConnection {
    conn: duckdb::Connection,
    in_transaction: bool,
}

impl DuckDbConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Ok(Self {
            conn: duckdb::Connection::open(path)?,
            in_transaction: false,
        })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self {
            conn: duckdb::Connection::open_in_memory()?,
            in_transaction: false,
        })
    }

    pub fn inner(&self) -> &duckdb::Connection {
        &self.conn
    }
}

impl Connection for DuckDbConnection {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn begin(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            return Err(DbError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NoTransaction);
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize, DbError> {
        let (sql, values) = bind_positional(sql, params)?;
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let values: Vec<DuckValue> = values.into_iter().map(DuckValue).collect();
        Ok(stmt.execute(params_from_iter(values.iter()))?)
    }
}

/// Opens [`DuckDbConnection`]s; `:memory:` yields a private in-memory database.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbConnector;

impl Connector for DuckDbConnector {
    fn connect(&self, data_source: &str) -> Result<Box<dyn Connection>, DbError> {
        let conn = if data_source == ":memory:" {
            DuckDbConnection::open_in_memory()?
        } else {
            DuckDbConnection::open(data_source)?
        };
        Ok(Box::new(conn))
    }
}
