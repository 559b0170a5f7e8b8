//! In-memory connection that records every call instead of storing rows.
//!
//! Used to check the exact statement and transaction sequence a pipeline
//! produces, and to inject backend failures.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::connection::{Connection, Connector, DbError};
use super::dialect::Dialect;
use crate::schema::SqlValue;

/// One call observed by a [`RecordingConnection`].
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEvent {
    Connect(String),
    Begin,
    Commit,
    Rollback,
    Execute {
        sql: String,
        params: Vec<(String, SqlValue)>,
    },
    Close,
}

/// Shared, append-only log of journal events.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEvent>>>);

impl Journal {
    fn lock(&self) -> MutexGuard<'_, Vec<JournalEvent>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: JournalEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<JournalEvent> {
        self.lock().clone()
    }

    /// Executed statements with their parameters, in order.
    pub fn executed(&self) -> Vec<(String, Vec<(String, SqlValue)>)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                JournalEvent::Execute { sql, params } => Some((sql.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }

    /// Executed SQL text only.
    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn count(&self, event: &JournalEvent) -> usize {
        self.lock().iter().filter(|e| *e == event).count()
    }
}

/// Failure injection and pacing shared by connections and connectors.
#[derive(Debug, Clone, Default)]
struct Behavior {
    fail_on: Option<String>,
    fail_commits: bool,
    execute_delay: Option<Duration>,
}

/// A [`Connection`] that journals calls and stores nothing.
pub struct RecordingConnection {
    dialect: Dialect,
    journal: Journal,
    behavior: Behavior,
    in_transaction: bool,
}

impl RecordingConnection {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            journal: Journal::default(),
            behavior: Behavior::default(),
            in_transaction: false,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Fail any statement whose SQL contains `needle`.
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.behavior.fail_on = Some(needle.into());
        self
    }

    /// Refuse every commit.
    pub fn fail_commits(mut self) -> Self {
        self.behavior.fail_commits = true;
        self
    }
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn begin(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            return Err(DbError::TransactionActive);
        }
        self.in_transaction = true;
        self.journal.push(JournalEvent::Begin);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NoTransaction);
        }
        if self.behavior.fail_commits {
            return Err(DbError::Backend("commit refused".into()));
        }
        self.in_transaction = false;
        self.journal.push(JournalEvent::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NoTransaction);
        }
        self.in_transaction = false;
        self.journal.push(JournalEvent::Rollback);
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize, DbError> {
        if !self.in_transaction {
            return Err(DbError::NoTransaction);
        }
        if let Some(delay) = self.behavior.execute_delay {
            std::thread::sleep(delay);
        }
        if let Some(needle) = &self.behavior.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(DbError::Backend(format!("injected failure on: {sql}")));
            }
        }
        self.journal.push(JournalEvent::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(1)
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.journal.push(JournalEvent::Close);
    }
}

/// Opens [`RecordingConnection`]s that all write to one journal.
#[derive(Debug, Clone)]
pub struct RecordingConnector {
    dialect: Dialect,
    journal: Journal,
    behavior: Behavior,
    fail_connect: bool,
}

impl RecordingConnector {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            journal: Journal::default(),
            behavior: Behavior::default(),
            fail_connect: false,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.behavior.fail_on = Some(needle.into());
        self
    }

    pub fn fail_commits(mut self) -> Self {
        self.behavior.fail_commits = true;
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Sleep before every statement, simulating a slow store.
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.behavior.execute_delay = Some(delay);
        self
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, data_source: &str) -> Result<Box<dyn Connection>, DbError> {
        if self.fail_connect {
            return Err(DbError::Backend(format!("cannot open '{data_source}'")));
        }
        self.journal.push(JournalEvent::Connect(data_source.to_string()));
        Ok(Box::new(RecordingConnection {
            dialect: self.dialect,
            journal: self.journal.clone(),
            behavior: self.behavior.clone(),
            in_transaction: false,
        }))
    }
}
