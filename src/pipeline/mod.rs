//! Ingestion pipeline.
//!
//! Each sink runs its own pipeline: the calling thread reads the feed and
//! enqueues items into a bounded queue, and a dedicated writer thread drains
//! the queue into the sink's statement cache, committing at every source file
//! boundary. The coordinator runs several sinks side by side over one
//! replayable feed.
//!
//! ```text
//! feed ──> SingleSinkOperator ──enqueue──> queue ──> IngestionWorker ──> cache ──> db
//!              (caller thread)                        (writer thread)
//! ```

pub mod coordinator;
pub mod operator;
pub mod queue;
pub mod result;
pub mod worker;

pub use coordinator::{FailurePolicy, MultiSinkCoordinator};
pub use operator::SingleSinkOperator;
pub use queue::{accumulating_queue, QueueConsumer, QueueError, QueueProducer};
pub use result::SinkResult;
pub use worker::{IngestionWorker, WorkerError, WorkerHandle, WorkerReport, WorkerState};

use thiserror::Error;

use crate::schema::SchemaError;
use crate::storage::{CacheError, Connection, DbError, PreparedCommandCache};

/// Statement cache over whichever backend a sink was configured with.
pub type SinkCache = PreparedCommandCache<Box<dyn Connection>>;

/// Unexpected failure of a sink run.
///
/// Domain failures reported by the feed are not errors at this level; they
/// come back as an unsuccessful [`SinkResult`].
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("sink '{sink}': cannot open data source: {source}")]
    Connect {
        sink: String,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("writer thread panicked")]
    WorkerPanic,

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("sink task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<WorkerError> for IngestError {
    fn from(error: WorkerError) -> Self {
        match error {
            WorkerError::Cache(e) => Self::Cache(e),
            WorkerError::Schema(e) => Self::Schema(e),
            WorkerError::Spawn(e) => Self::Spawn(e),
            WorkerError::Panicked => Self::WorkerPanic,
        }
    }
}
