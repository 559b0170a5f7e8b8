//! Ingestion worker: the dedicated writer thread of one sink.
//!
//! The worker owns the sink's statement cache for the whole drain. It
//! creates each table the first time a record of that table arrives, inserts
//! every record (and every present child row), and commits/rotates the
//! transaction at every file boundary.
//!
//! Errors never escape the thread as panics. The thread returns either a
//! [`WorkerReport`] or a [`WorkerFailure`], both carrying the cache back to
//! the controlling thread, which performs the final commit or the rollback.

use std::collections::HashSet;
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::queue::QueueConsumer;
use super::SinkCache;
use crate::feed::ReadResult;
use crate::observability::metrics::{record_commit, record_records};
use crate::schema::{RecordData, SchemaError, TableSchema};
use crate::storage::dialect::adapt_create_table;
use crate::storage::CacheError;

/// Default interval between "still ingesting" progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Error type for the writer thread.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("writer thread panicked")]
    Panicked,
}

/// Lifecycle of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Draining,
    Committing,
    Drained,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::Committing => "committing",
            Self::Drained => "drained",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run worker settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sink name used in logs, metrics and the thread name.
    pub sink: String,
    pub progress_interval: Duration,
}

impl WorkerSettings {
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Outcome of a clean drain. The last transaction is still open.
#[derive(Debug)]
pub struct WorkerReport {
    /// Tables created during this run, in creation order.
    pub published_tables: Vec<String>,
    pub records: u64,
    pub statements: u64,
    pub files: u64,
    pub cache: SinkCache,
}

/// Outcome of a failed drain.
#[derive(Debug)]
pub struct WorkerFailure {
    pub error: WorkerError,
    /// Returned so the controlling thread can roll back; `None` if the
    /// thread panicked, in which case the cache was closed while unwinding.
    pub cache: Option<SinkCache>,
    pub records: u64,
}

/// Handle to a running writer thread.
pub struct WorkerHandle {
    sink: String,
    thread: JoinHandle<Result<WorkerReport, WorkerFailure>>,
}

impl WorkerHandle {
    /// Wait for the writer thread and surface its outcome on this thread.
    pub fn join(self) -> Result<WorkerReport, WorkerFailure> {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(sink = %self.sink, "Writer thread panicked");
                Err(WorkerFailure {
                    error: WorkerError::Panicked,
                    cache: None,
                    records: 0,
                })
            }
        }
    }
}

/// State private to the writer thread.
pub struct IngestionWorker {
    settings: WorkerSettings,
    cache: SinkCache,
    state: WorkerState,
    published: HashSet<String>,
    published_order: Vec<String>,
    records: u64,
    statements: u64,
    files: u64,
    file_records: u64,
    file_started: Instant,
    last_progress: Instant,
}

impl IngestionWorker {
    pub fn new(cache: SinkCache, settings: WorkerSettings) -> Self {
        let now = Instant::now();
        Self {
            settings,
            cache,
            state: WorkerState::Idle,
            published: HashSet::new(),
            published_order: Vec::new(),
            records: 0,
            statements: 0,
            files: 0,
            file_records: 0,
            file_started: now,
            last_progress: now,
        }
    }

    /// Start draining `consumer` on a new thread.
    ///
    /// The thread enters the caller's current tracing span so its log lines
    /// carry the same run fields.
    pub fn spawn(self, consumer: QueueConsumer<ReadResult>) -> Result<WorkerHandle, WorkerError> {
        let sink = self.settings.sink.clone();
        let span = tracing::Span::current();
        let thread = thread::Builder::new()
            .name(format!("stowage-writer-{sink}"))
            .spawn(move || {
                let _guard = span.enter();
                self.drain(consumer)
            })
            .map_err(WorkerError::Spawn)?;

        Ok(WorkerHandle { sink, thread })
    }

    /// Drain the queue on the current thread until the producer is joined.
    pub fn drain(mut self, consumer: QueueConsumer<ReadResult>) -> Result<WorkerReport, WorkerFailure> {
        self.transition(WorkerState::Draining);

        for item in consumer {
            let step = match item {
                ReadResult::RecordsExist { schema, record } => self.ingest_record(&schema, &record),
                ReadResult::FileBoundary { file_name } => self.finish_file(&file_name),
            };
            if let Err(error) = step {
                self.transition(WorkerState::Failed);
                tracing::warn!(
                    sink = %self.settings.sink,
                    error = %error,
                    records = self.records,
                    "Writer thread stopped"
                );
                return Err(WorkerFailure {
                    error,
                    cache: Some(self.cache),
                    records: self.records,
                });
            }
        }

        self.transition(WorkerState::Drained);
        record_records(&self.settings.sink, self.file_records);
        Ok(WorkerReport {
            published_tables: self.published_order,
            records: self.records,
            statements: self.statements,
            files: self.files,
            cache: self.cache,
        })
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::trace!(sink = %self.settings.sink, from = %self.state, to = %next, "Worker state");
        self.state = next;
    }

    fn ingest_record(&mut self, schema: &TableSchema, record: &RecordData) -> Result<(), WorkerError> {
        if !self.published.contains(&schema.table_name) {
            tracing::info!(sink = %self.settings.sink, table = %schema.table_name, "Creating table");
            self.create_table(schema)?;
            self.published.insert(schema.table_name.clone());
            self.published_order.push(schema.table_name.clone());
        }

        self.records += 1;
        self.file_records += 1;
        if self.last_progress.elapsed() >= self.settings.progress_interval {
            tracing::info!(
                sink = %self.settings.sink,
                records = self.file_records,
                "Ingesting"
            );
            self.last_progress = Instant::now();
        }

        self.insert(schema, record)
    }

    fn create_table(&mut self, schema: &TableSchema) -> Result<(), WorkerError> {
        let start = Instant::now();
        let dialect = self.cache.dialect();
        for ddl in schema.create_table_sql() {
            let ddl = adapt_create_table(dialect, &ddl);
            let mut command = self.cache.get(&ddl)?;
            tracing::trace!(query = command.logging_query(), "Create table");
            command.execute()?;
            self.statements += 1;
        }
        tracing::debug!(
            sink = %self.settings.sink,
            table = %schema.table_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Table created"
        );
        Ok(())
    }

    fn insert(&mut self, schema: &TableSchema, record: &RecordData) -> Result<(), WorkerError> {
        for built in schema.insert_commands(record)? {
            let mut command = self.cache.get(&built.sql)?;
            command.bind_all(built.params);
            tracing::trace!(query = command.logging_query(), "Insert row");
            command.execute()?;
            self.statements += 1;
        }
        Ok(())
    }

    fn finish_file(&mut self, file_name: &str) -> Result<(), WorkerError> {
        self.transition(WorkerState::Committing);
        self.cache.commit_and_new_transaction()?;
        record_commit(&self.settings.sink);
        record_records(&self.settings.sink, self.file_records);

        tracing::info!(
            sink = %self.settings.sink,
            file = file_name,
            records = self.file_records,
            elapsed_ms = self.file_started.elapsed().as_millis() as u64,
            "File committed"
        );

        self.files += 1;
        self.file_records = 0;
        self.file_started = Instant::now();
        self.last_progress = self.file_started;
        self.transition(WorkerState::Draining);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::accumulating_queue;
    use crate::schema::{ColumnSpec, ColumnType};
    use crate::storage::dialect::Dialect;
    use crate::storage::recording::{Journal, JournalEvent, RecordingConnection};
    use crate::storage::{Connection, PreparedCommandCache};
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn cache(conn: RecordingConnection) -> (SinkCache, Journal) {
        let journal = conn.journal();
        let boxed: Box<dyn Connection> = Box::new(conn);
        (PreparedCommandCache::new(boxed).unwrap(), journal)
    }

    fn schema(name: &str) -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new(
                name,
                vec![
                    ColumnSpec::identity("id"),
                    ColumnSpec::new("label", ColumnType::Text),
                ],
                vec![],
            )
            .unwrap(),
        )
    }

    fn run(conn: RecordingConnection, items: Vec<ReadResult>) -> (Result<WorkerReport, WorkerFailure>, Journal) {
        let (cache, journal) = cache(conn);
        let (mut producer, consumer) = accumulating_queue(NonZeroUsize::new(2).unwrap());
        let handle = IngestionWorker::new(cache, WorkerSettings::new("test"))
            .spawn(consumer)
            .unwrap();
        for item in items {
            if producer.enqueue(item, ReadResult::is_file_boundary).is_err() {
                break;
            }
        }
        let _ = producer.join();
        (handle.join(), journal)
    }

    #[test]
    fn test_table_created_once_and_boundary_rotates() {
        let a = schema("a");
        let items = vec![
            ReadResult::record(a.clone(), RecordData::new().with_value("label", "x")),
            ReadResult::record(a.clone(), RecordData::new().with_value("label", "y")),
            ReadResult::boundary("f1"),
        ];
        let (outcome, journal) = run(RecordingConnection::new(Dialect::Sqlite), items);
        let report = outcome.unwrap();

        assert_eq!(report.published_tables, vec!["a".to_string()]);
        assert_eq!((report.records, report.statements, report.files), (2, 3, 1));
        assert_eq!(
            journal
                .statements()
                .iter()
                .filter(|s| s.starts_with("CREATE TABLE"))
                .count(),
            1
        );
        assert_eq!(journal.count(&JournalEvent::Commit), 1);
        assert_eq!(journal.count(&JournalEvent::Begin), 2);
        assert!(report.cache.current_transaction().is_some());
    }

    #[test]
    fn test_duckdb_sink_receives_translated_ddl() {
        let items = vec![ReadResult::record(schema("a"), RecordData::new())];
        let (outcome, journal) = run(RecordingConnection::new(Dialect::DuckDb), items);
        outcome.unwrap();

        assert_eq!(
            journal.statements()[0],
            "CREATE TABLE IF NOT EXISTS a (id BIGINT PRIMARY KEY GENERATED ALWAYS AS IDENTITY, label VARCHAR)"
        );
        assert_eq!(
            journal.statements()[1],
            "INSERT INTO a (label) VALUES (:label)"
        );
    }

    #[test]
    fn test_failure_returns_cache_with_live_transaction() {
        let items = vec![
            ReadResult::record(schema("a"), RecordData::new()),
            ReadResult::record(schema("b"), RecordData::new()),
            ReadResult::record(schema("a"), RecordData::new()),
        ];
        let conn = RecordingConnection::new(Dialect::Sqlite).fail_on("INSERT INTO b");
        let (outcome, journal) = run(conn, items);
        let failure = outcome.unwrap_err();

        assert!(matches!(failure.error, WorkerError::Cache(CacheError::Database(_))));
        assert_eq!(failure.records, 2);
        let mut cache = failure.cache.unwrap();
        assert!(cache.current_transaction().is_some());
        cache.rollback().unwrap();
        assert_eq!(journal.count(&JournalEvent::Rollback), 1);
        assert_eq!(journal.count(&JournalEvent::Commit), 0);
    }
}
