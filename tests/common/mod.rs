//! Test utilities for Stowage integration tests.
//!
//! Provides:
//! - Temporary directory fixtures for sink databases and feed files
//! - A JSON-lines feed builder
//! - Row-count helpers for checking what a SQLite sink committed

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use stowage::config::SinkConfig;
use stowage::schema::{ChildTableSchema, ColumnSpec, ColumnType, TableSchema};
use stowage::storage::Backend;
use tempfile::TempDir;

/// Test fixture that manages a temporary directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    pub temp_dir: TempDir,
    /// Path of the primary sink database.
    pub db_path: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        stowage::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    pub fn db_path_str(&self) -> &str {
        self.db_path.to_str().expect("invalid path")
    }

    /// Path of another database file in the fixture directory.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.temp_dir.path().join(file_name)
    }

    /// A data source that SQLite cannot open.
    pub fn unreachable_data_source(&self) -> String {
        self.path("missing-dir/nowhere.db").display().to_string()
    }

    /// Write `feed` as a JSON-lines file and return its path.
    pub fn write_feed(&self, feed: &FeedBuilder) -> PathBuf {
        let path = self.path("feed.jsonl");
        std::fs::write(&path, feed.to_jsonl()).expect("failed to write feed");
        path
    }

    /// SQLite sink configuration for the primary database.
    pub fn sqlite_sink(&self) -> SinkConfig {
        SinkConfig::new("sqlite", Backend::Sqlite, self.db_path_str())
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds feed files line by line.
#[derive(Debug, Default)]
pub struct FeedBuilder {
    lines: Vec<Value>,
}

impl FeedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the `race` table with its `runner` child table.
    pub fn race_schema(mut self) -> Self {
        self.lines.push(json!({
            "type": "schema",
            "table": "race",
            "columns": [
                {"name": "id", "type": "integer", "identity": true},
                {"name": "name", "type": "text"},
                {"name": "distance", "type": "real"},
                {"name": "run_at", "type": "datetime"}
            ],
            "children": [
                {"table": "runner", "columns": [
                    {"name": "horse", "type": "text"},
                    {"name": "draw", "type": "integer"}
                ]}
            ]
        }));
        self
    }

    /// A race record; `None` entries are absent runner rows.
    pub fn race(mut self, name: &str, runners: &[Option<&str>]) -> Self {
        let rows: Vec<Value> = runners
            .iter()
            .enumerate()
            .map(|(draw, horse)| match horse {
                Some(horse) => json!({"values": {"horse": horse, "draw": draw as i64 + 1}}),
                None => json!({"present": false}),
            })
            .collect();
        self.lines.push(json!({
            "type": "record",
            "table": "race",
            "values": {"name": name, "distance": 1609.3, "run_at": "2024-06-01 14:30:00"},
            "children": [rows]
        }));
        self
    }

    pub fn file(mut self, name: &str) -> Self {
        self.lines.push(json!({"type": "file", "name": name}));
        self
    }

    pub fn error(mut self, code: i32, message: &str, argument: &str) -> Self {
        self.lines.push(json!({
            "type": "error",
            "code": code,
            "message": message,
            "arguments": [argument]
        }));
        self
    }

    pub fn to_jsonl(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{line}\n"))
            .collect()
    }
}

/// The `race` schema as built by the feed's schema line.
pub fn race_schema() -> Arc<TableSchema> {
    Arc::new(
        TableSchema::new(
            "race",
            vec![
                ColumnSpec::identity("id"),
                ColumnSpec::new("name", ColumnType::Text),
                ColumnSpec::new("distance", ColumnType::Real),
                ColumnSpec::new("run_at", ColumnType::DateTime),
            ],
            vec![ChildTableSchema::new(
                "runner",
                vec![
                    ColumnSpec::new("horse", ColumnType::Text),
                    ColumnSpec::new("draw", ColumnType::Integer),
                ],
            )
            .expect("valid child schema")],
        )
        .expect("valid schema"),
    )
}

/// Rows in `table`, or `None` if the table does not exist.
pub fn count_rows(db_path: &std::path::Path, table: &str) -> Option<i64> {
    let conn = rusqlite::Connection::open(db_path).expect("failed to open database");
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .ok()
}

/// Values of `column` in `table`, ordered by rowid.
pub fn column_values(db_path: &std::path::Path, table: &str, column: &str) -> Vec<String> {
    let conn = rusqlite::Connection::open(db_path).expect("failed to open database");
    let mut stmt = conn
        .prepare(&format!("SELECT {column} FROM {table} ORDER BY rowid"))
        .expect("failed to prepare");
    stmt.query_map([], |row| row.get::<_, String>(0))
        .expect("failed to query")
        .collect::<Result<_, _>>()
        .expect("failed to read rows")
}
