//! Prepared statement cache with transaction rotation.
//!
//! The cache owns a sink's connection and always holds exactly one live
//! transaction until it is committed or rolled back. Commands are cached by
//! their exact SQL text. Each cached entry remembers which transaction it is
//! bound to; [`PreparedCommandCache::commit_and_new_transaction`] commits,
//! opens the next transaction and rebinds every entry before anything else
//! can execute, so the cache survives any number of rotations.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::connection::{Connection, DbError};
use super::dialect::{placeholder_names, Dialect};
use crate::schema::{SqlCommand, SqlValue};

/// Error type for statement cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("transaction closed: the statement cache has no active transaction")]
    TransactionClosed,

    #[error("command is bound to {bound} but the live transaction is {live}: {command}")]
    StaleBinding {
        command: String,
        bound: TransactionId,
        live: TransactionId,
    },

    #[error("statement cache has been closed")]
    Closed,

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Generation number of a cache transaction; increases on every rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// One cached command.
#[derive(Debug)]
pub struct PreparedEntry {
    command_text: String,
    bound_transaction: TransactionId,
    is_parameterless: bool,
    params: Vec<(String, SqlValue)>,
    executions: u64,
}

impl PreparedEntry {
    fn new(command_text: &str, transaction: TransactionId) -> Self {
        Self {
            command_text: command_text.to_string(),
            bound_transaction: transaction,
            is_parameterless: placeholder_names(command_text).is_empty(),
            params: Vec::new(),
            executions: 0,
        }
    }
}

/// Statement cache owning one connection and its current transaction.
pub struct PreparedCommandCache<C: Connection> {
    connection: Option<C>,
    dialect: Dialect,
    transaction: Option<TransactionId>,
    last_transaction: u64,
    entries: HashMap<String, PreparedEntry>,
    commits: u64,
}

impl<C: Connection> PreparedCommandCache<C> {
    /// Take ownership of `connection` and open the first transaction.
    pub fn new(mut connection: C) -> Result<Self, CacheError> {
        connection.begin()?;
        Ok(Self {
            dialect: connection.dialect(),
            connection: Some(connection),
            transaction: Some(TransactionId(1)),
            last_transaction: 1,
            entries: HashMap::new(),
            commits: 0,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The live transaction, or `None` after commit/rollback/close.
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Transaction a cached command is currently bound to.
    pub fn bound_transaction(&self, command_text: &str) -> Option<TransactionId> {
        self.entries.get(command_text).map(|e| e.bound_transaction)
    }

    /// Number of times a cached command has executed.
    pub fn executions(&self, command_text: &str) -> Option<u64> {
        self.entries.get(command_text).map(|e| e.executions)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful commits since the cache was created.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// Get the command cached under `command_text`, creating it if needed.
    ///
    /// A reused command starts with no bound parameters.
    ///
    /// # Errors
    ///
    /// Fails fast with [`CacheError::TransactionClosed`] when there is no live
    /// transaction, and [`CacheError::Closed`] after [`close`](Self::close).
    pub fn get(&mut self, command_text: &str) -> Result<PreparedCommand<'_, C>, CacheError> {
        let connection = self.connection.as_mut().ok_or(CacheError::Closed)?;
        let live = self.transaction.ok_or(CacheError::TransactionClosed)?;

        let entry = match self.entries.entry(command_text.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.params.clear();
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(PreparedEntry::new(command_text, live)),
        };

        Ok(PreparedCommand {
            entry,
            connection,
            live,
        })
    }

    /// Execute a built command through the cache.
    pub fn run(&mut self, command: &SqlCommand) -> Result<usize, CacheError> {
        self.get(&command.sql)?
            .bind_all(command.params.iter().cloned())
            .execute()
    }

    /// Commit the live transaction. The cache is left without a transaction.
    ///
    /// If the backend refuses the commit, the transaction stays live so the
    /// caller can still roll it back.
    pub fn commit(&mut self) -> Result<(), CacheError> {
        let connection = self.connection.as_mut().ok_or(CacheError::Closed)?;
        if self.transaction.is_none() {
            return Err(CacheError::TransactionClosed);
        }
        connection.commit()?;
        self.transaction = None;
        self.commits += 1;
        Ok(())
    }

    /// Commit, open a new transaction and rebind every cached command to it.
    pub fn commit_and_new_transaction(&mut self) -> Result<TransactionId, CacheError> {
        self.commit()?;

        let connection = self.connection.as_mut().ok_or(CacheError::Closed)?;
        connection.begin()?;

        self.last_transaction += 1;
        let next = TransactionId(self.last_transaction);
        self.transaction = Some(next);
        for entry in self.entries.values_mut() {
            entry.bound_transaction = next;
        }
        Ok(next)
    }

    /// Roll back the live transaction, if any.
    ///
    /// Safe to call on every failure path: without a live transaction, or
    /// after close, this is a no-op.
    pub fn rollback(&mut self) -> Result<(), CacheError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        if self.transaction.take().is_none() {
            return Ok(());
        }
        connection.rollback()?;
        Ok(())
    }

    /// Release every cached command, roll back any live transaction and
    /// drop the connection. Idempotent.
    pub fn close(&mut self) {
        if self.connection.is_none() {
            return;
        }
        self.entries.clear();
        if let Err(e) = self.rollback() {
            tracing::warn!(error = %e, "Rollback during statement cache close failed");
        }
        self.connection = None;
    }
}

impl<C: Connection> Drop for PreparedCommandCache<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: Connection> fmt::Debug for PreparedCommandCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCommandCache")
            .field("dialect", &self.dialect)
            .field("transaction", &self.transaction)
            .field("entries", &self.entries.len())
            .field("closed", &self.connection.is_none())
            .finish()
    }
}

/// A cached command borrowed from the cache for one execution.
pub struct PreparedCommand<'a, C: Connection> {
    entry: &'a mut PreparedEntry,
    connection: &'a mut C,
    live: TransactionId,
}

impl<C: Connection> PreparedCommand<'_, C> {
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        self.entry.params.push((name.into(), value.into()));
        self
    }

    pub fn bind_all(&mut self, params: impl IntoIterator<Item = (String, SqlValue)>) -> &mut Self {
        self.entry.params.extend(params);
        self
    }

    /// Execute against the live transaction, returning affected rows.
    pub fn execute(&mut self) -> Result<usize, CacheError> {
        if self.entry.bound_transaction != self.live {
            return Err(CacheError::StaleBinding {
                command: self.entry.command_text.clone(),
                bound: self.entry.bound_transaction,
                live: self.live,
            });
        }
        let affected = self
            .connection
            .execute(&self.entry.command_text, &self.entry.params)?;
        self.entry.executions += 1;
        Ok(affected)
    }

    /// SQL text for log output.
    pub fn logging_query(&self) -> &str {
        &self.entry.command_text
    }

    pub fn is_parameterless(&self) -> bool {
        self.entry.is_parameterless
    }

    pub fn bound_transaction(&self) -> TransactionId {
        self.entry.bound_transaction
    }

    pub fn params(&self) -> &[(String, SqlValue)] {
        &self.entry.params
    }
}
