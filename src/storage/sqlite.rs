//! SQLite backend.
//!
//! Statement reuse is delegated to rusqlite's per-connection statement cache,
//! so a command text executed many times in a run is parsed once.

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use std::path::Path;

use super::connection::{Connection, Connector, DbError};
use super::dialect::Dialect;
use crate::schema::SqlValue;

/// Number of prepared statements rusqlite keeps per connection.
const STATEMENT_CACHE_CAPACITY: usize = 256;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::from(*v),
            SqlValue::Real(v) => ToSqlOutput::from(*v),
            SqlValue::Text(v) => ToSqlOutput::from(v.as_str()),
            SqlValue::Blob(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

/// Apply write-path pragmas.
///
/// WAL lets readers keep working while a sink holds a long file-sized
/// transaction open.
pub fn apply_pragmas(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// A sink connection backed by a SQLite database file.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    in_transaction: bool,
}

impl SqliteConnection {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open(path)?;
        apply_pragmas(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(rusqlite::Connection::open_in_memory()?))
    }

    fn from_connection(conn: rusqlite::Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Self {
            conn,
            in_transaction: false,
        }
    }

    /// Borrow the underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            return Err(DbError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN")?;
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
        let mut stmt = self.conn.prepare_cached(sql)?;
        for (name, value) in params {
            let index = stmt
                .parameter_index(&format!(":{name}"))?
                .ok_or_else(|| DbError::UnboundParameter(name.clone()))?;
            stmt.raw_bind_parameter(index, value)?;
        }
        Ok(stmt.raw_execute()?)
    }
}

/// Opens [`SqliteConnection`]s; `:memory:` yields a private in-memory database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, data_source: &str) -> Result<Box<dyn Connection>, DbError> {
        let conn = if data_source == ":memory:" {
            SqliteConnection::open_in_memory()?
        } else {
            SqliteConnection::open(data_source)?
        };
        Ok(Box::new(conn))
    }
}
