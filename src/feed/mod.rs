//! Record feeds.
//!
//! A feed is an ordered sequence of [`ReadResult`]s grouped by source file.
//! Feeds are consumed by every sink independently, so a [`FeedSource`] hands
//! out a fresh iterator on each [`read`](FeedSource::read) and must yield the
//! same sequence every time.

pub mod jsonl;

pub use jsonl::JsonLinesFeed;

use std::sync::Arc;
use thiserror::Error;

use crate::schema::{RecordData, TableSchema};

/// Domain failure reported by the record source.
///
/// This is the expected, recoverable failure: a sink that hits it rolls back
/// and reports a structured result instead of erroring out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct SourceError {
    pub code: i32,
    pub message: String,
    pub arguments: Vec<String>,
}

impl SourceError {
    /// The source file or stream could not be read.
    pub const READ_FAILED: i32 = -1;
    /// A line of the source could not be decoded.
    pub const PARSE_FAILED: i32 = -2;
    /// A record refers to a table whose schema was never declared.
    pub const UNKNOWN_TABLE: i32 = -3;
    /// A declared schema is unusable.
    pub const INVALID_SCHEMA: i32 = -4;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }
}

/// One item of a feed.
#[derive(Debug, Clone)]
pub enum ReadResult {
    /// A decoded record and the schema of its table.
    RecordsExist {
        schema: Arc<TableSchema>,
        record: RecordData,
    },
    /// Everything before this item came from `file_name`.
    FileBoundary { file_name: String },
}

impl ReadResult {
    pub fn record(schema: Arc<TableSchema>, record: RecordData) -> Self {
        Self::RecordsExist { schema, record }
    }

    pub fn boundary(file_name: impl Into<String>) -> Self {
        Self::FileBoundary {
            file_name: file_name.into(),
        }
    }

    pub fn is_file_boundary(&self) -> bool {
        matches!(self, Self::FileBoundary { .. })
    }

    /// Table of a record item; `None` for boundaries.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::RecordsExist { schema, .. } => Some(&schema.table_name),
            Self::FileBoundary { .. } => None,
        }
    }
}

pub type FeedItem = Result<ReadResult, SourceError>;

pub type FeedIter<'a> = Box<dyn Iterator<Item = FeedItem> + Send + 'a>;

/// A replayable record source, safe to read from several sinks at once.
pub trait FeedSource: Send + Sync {
    /// Start a new pass over the feed from the beginning.
    fn read(&self) -> FeedIter<'_>;
}

/// A feed materialized in memory.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    items: Vec<FeedItem>,
}

impl FeedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize one pass of `source`.
    pub fn capture(source: &dyn FeedSource) -> Self {
        source.read().collect()
    }

    pub fn push_record(&mut self, schema: Arc<TableSchema>, record: RecordData) -> &mut Self {
        self.items.push(Ok(ReadResult::record(schema, record)));
        self
    }

    pub fn push_boundary(&mut self, file_name: impl Into<String>) -> &mut Self {
        self.items.push(Ok(ReadResult::boundary(file_name)));
        self
    }

    pub fn push_failure(&mut self, error: SourceError) -> &mut Self {
        self.items.push(Err(error));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<FeedItem> for FeedSnapshot {
    fn from_iter<I: IntoIterator<Item = FeedItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl FeedSource for FeedSnapshot {
    fn read(&self) -> FeedIter<'_> {
        Box::new(self.items.iter().cloned())
    }
}
