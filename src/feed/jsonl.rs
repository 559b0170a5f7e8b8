//! JSON-lines feed files.
//!
//! Each line is one tagged object:
//!
//! ```text
//! {"type":"schema","table":"race","columns":[{"name":"id","type":"integer","identity":true},{"name":"name","type":"text"}],
//!  "children":[{"table":"race_entry","columns":[{"name":"horse","type":"text"}]}]}
//! {"type":"record","table":"race","values":{"name":"Derby"},"children":[[{"values":{"horse":"A"}},{"present":false}]]}
//! {"type":"file","name":"RA20240101.txt"}
//! {"type":"error","code":-502,"message":"download interrupted","arguments":["RA20240102.txt"]}
//! ```
//!
//! A schema must be declared before the first record of its table. Any
//! decoding problem, or an `error` line, ends the pass with a [`SourceError`].

use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{FeedItem, FeedIter, FeedSource, ReadResult, SourceError};
use crate::schema::{
    ChildRow, ChildRows, ChildTableSchema, ColumnSpec, ColumnType, RecordData, SchemaError,
    SqlValue, TableSchema,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedLine {
    Schema {
        table: String,
        columns: Vec<WireColumn>,
        #[serde(default)]
        children: Vec<WireChildTable>,
    },
    Record {
        table: String,
        #[serde(default)]
        values: HashMap<String, SqlValue>,
        #[serde(default)]
        children: Vec<Vec<WireChildRow>>,
    },
    File {
        name: String,
    },
    Error {
        code: i32,
        message: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct WireColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: ColumnType,
    #[serde(default)]
    identity: bool,
    #[serde(default)]
    parameter: Option<String>,
}

impl From<WireColumn> for ColumnSpec {
    fn from(wire: WireColumn) -> Self {
        let spec = if wire.identity {
            ColumnSpec::identity(wire.name)
        } else {
            ColumnSpec::new(wire.name, wire.column_type)
        };
        match wire.parameter {
            Some(parameter) => spec.with_parameter_name(parameter),
            None => spec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChildTable {
    table: String,
    columns: Vec<WireColumn>,
}

fn default_present() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireChildRow {
    #[serde(default = "default_present")]
    present: bool,
    #[serde(default)]
    values: HashMap<String, SqlValue>,
}

/// A feed stored as a JSON-lines file; every read re-opens the file.
#[derive(Debug, Clone)]
pub struct JsonLinesFeed {
    path: PathBuf,
}

impl JsonLinesFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeedSource for JsonLinesFeed {
    fn read(&self) -> FeedIter<'_> {
        match File::open(&self.path) {
            Ok(file) => Box::new(JsonLinesIter {
                path: self.path.display().to_string(),
                lines: BufReader::new(file).lines(),
                schemas: HashMap::new(),
                line_no: 0,
                done: false,
            }),
            Err(e) => Box::new(std::iter::once(Err(SourceError::new(
                SourceError::READ_FAILED,
                format!("cannot open feed: {e}"),
            )
            .with_argument(self.path.display().to_string())))),
        }
    }
}

struct JsonLinesIter {
    path: String,
    lines: Lines<BufReader<File>>,
    schemas: HashMap<String, Arc<TableSchema>>,
    line_no: usize,
    done: bool,
}

impl JsonLinesIter {
    fn fail(&mut self, code: i32, message: String) -> Option<FeedItem> {
        self.done = true;
        Some(Err(SourceError::new(code, message)
            .with_argument(self.path.clone())
            .with_argument(self.line_no.to_string())))
    }

    fn declare(
        &mut self,
        table: String,
        columns: Vec<WireColumn>,
        children: Vec<WireChildTable>,
    ) -> Result<(), SchemaError> {
        let children = children
            .into_iter()
            .map(|child| {
                ChildTableSchema::new(
                    child.table,
                    child.columns.into_iter().map(ColumnSpec::from).collect(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let schema = TableSchema::new(
            table.clone(),
            columns.into_iter().map(ColumnSpec::from).collect(),
            children,
        )?;
        self.schemas.insert(table, Arc::new(schema));
        Ok(())
    }
}

impl Iterator for JsonLinesIter {
    type Item = FeedItem;

    fn next(&mut self) -> Option<FeedItem> {
        if self.done {
            return None;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return self.fail(SourceError::READ_FAILED, format!("read error: {e}")),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let parsed: FeedLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(e) => return self.fail(SourceError::PARSE_FAILED, format!("invalid feed line: {e}")),
            };

            match parsed {
                FeedLine::Schema {
                    table,
                    columns,
                    children,
                } => {
                    if let Err(e) = self.declare(table, columns, children) {
                        return self.fail(SourceError::INVALID_SCHEMA, e.to_string());
                    }
                }
                FeedLine::Record {
                    table,
                    values,
                    children,
                } => {
                    let Some(schema) = self.schemas.get(&table).cloned() else {
                        return self.fail(
                            SourceError::UNKNOWN_TABLE,
                            format!("record for undeclared table '{table}'"),
                        );
                    };
                    let record = RecordData {
                        values,
                        children: children
                            .into_iter()
                            .map(|rows| {
                                ChildRows::new(
                                    rows.into_iter()
                                        .map(|row| ChildRow {
                                            present: row.present,
                                            values: row.values,
                                        })
                                        .collect(),
                                )
                            })
                            .collect(),
                    };
                    return Some(Ok(ReadResult::record(schema, record)));
                }
                FeedLine::File { name } => return Some(Ok(ReadResult::boundary(name))),
                FeedLine::Error {
                    code,
                    message,
                    arguments,
                } => {
                    self.done = true;
                    return Some(Err(SourceError {
                        code,
                        message,
                        arguments,
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn feed_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const FEED: &str = r#"{"type":"schema","table":"race","columns":[{"name":"id","type":"integer","identity":true},{"name":"name","type":"text"}],"children":[{"table":"race_entry","columns":[{"name":"horse","type":"text"}]}]}
{"type":"record","table":"race","values":{"name":"Derby"},"children":[[{"values":{"horse":"A"}},{"present":false}]]}

{"type":"file","name":"RA1.txt"}
"#;

    #[test]
    fn test_reads_records_and_boundaries() {
        let file = feed_file(FEED);
        let feed = JsonLinesFeed::new(file.path());
        let items: Vec<ReadResult> = feed.read().map(Result::unwrap).collect();

        assert_eq!(items.len(), 2);
        match &items[0] {
            ReadResult::RecordsExist { schema, record } => {
                assert_eq!(schema.table_name, "race");
                assert!(schema.columns[0].is_identity);
                assert_eq!(record.value("name"), Some(&SqlValue::from("Derby")));
                assert_eq!(record.children[0].presence_mask(), vec![true, false]);
            }
            other => panic!("expected record, got {other:?}"),
        }
        assert!(items[1].is_file_boundary());
    }

    #[test]
    fn test_read_is_replayable() {
        let file = feed_file(FEED);
        let feed = JsonLinesFeed::new(file.path());
        assert_eq!(feed.read().count(), feed.read().count());
    }

    #[test]
    fn test_undeclared_table_ends_feed() {
        let file = feed_file(
            "{\"type\":\"record\",\"table\":\"ghost\",\"values\":{}}\n{\"type\":\"file\",\"name\":\"x\"}\n",
        );
        let items: Vec<FeedItem> = JsonLinesFeed::new(file.path()).read().collect();
        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.code, SourceError::UNKNOWN_TABLE);
        assert_eq!(err.arguments[1], "1");
    }

    #[test]
    fn test_error_line_surfaces_upstream_failure() {
        let file = feed_file(
            "{\"type\":\"error\",\"code\":-502,\"message\":\"interrupted\",\"arguments\":[\"RA2.txt\"]}\n",
        );
        let items: Vec<FeedItem> = JsonLinesFeed::new(file.path()).read().collect();
        assert_eq!(
            items[0].as_ref().unwrap_err(),
            &SourceError {
                code: -502,
                message: "interrupted".into(),
                arguments: vec!["RA2.txt".into()],
            }
        );
    }

    #[test]
    fn test_missing_file_is_source_failure() {
        let items: Vec<FeedItem> = JsonLinesFeed::new("/nonexistent/feed.jsonl").read().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap_err().code,
            SourceError::READ_FAILED
        );
    }

    #[test]
    fn test_garbage_line_is_parse_failure() {
        let file = feed_file("not json\n");
        let items: Vec<FeedItem> = JsonLinesFeed::new(file.path()).read().collect();
        assert_eq!(
            items[0].as_ref().unwrap_err().code,
            SourceError::PARSE_FAILED
        );
    }
}
