//! Single-sink operator: one connection, one cache, one queue, one worker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::queue::{accumulating_queue, QueueError, QueueProducer};
use super::worker::{
    IngestionWorker, WorkerFailure, WorkerReport, WorkerSettings, DEFAULT_PROGRESS_INTERVAL,
};
use super::{IngestError, SinkCache, SinkResult};
use crate::config::SinkConfig;
use crate::feed::{FeedItem, ReadResult, SourceError};
use crate::observability::metrics::{
    record_commit, record_ingest_duration, record_pending_boundaries, record_sink_failure,
};
use crate::storage::{Connector, PreparedCommandCache};

/// Why the producer stopped before the end of the feed.
enum ProduceStop {
    Source(SourceError),
    Cancelled,
    Queue(QueueError),
}

impl From<QueueError> for ProduceStop {
    fn from(error: QueueError) -> Self {
        Self::Queue(error)
    }
}

/// Runs a whole feed into one sink.
pub struct SingleSinkOperator {
    config: SinkConfig,
    excluded: HashSet<String>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    progress_interval: Duration,
}

impl SingleSinkOperator {
    pub fn new(config: SinkConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            excluded: config.excluded_tables.iter().cloned().collect(),
            config,
            connector,
            cancel: CancellationToken::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Stop producing once `token` is cancelled; the run then rolls back.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Ingest every item of `feed`.
    ///
    /// A [`SourceError`] in the feed rolls back the open transaction and is
    /// reported as an unsuccessful [`SinkResult`]. Any other failure rolls
    /// back and is returned as an [`IngestError`]. Files committed before
    /// the failure stay committed.
    pub fn ingest_all<I>(&self, feed: I) -> Result<SinkResult, IngestError>
    where
        I: IntoIterator<Item = FeedItem>,
    {
        let run_id = crate::generate_run_id();
        let span = tracing::info_span!(
            "ingest",
            sink = %self.config.name,
            backend = %self.config.backend,
            run_id = %run_id
        );
        let _enter = span.enter();

        tracing::info!(
            data_source = %self.config.data_source,
            throttle_size = self.config.throttle_size.get(),
            "Starting ingestion"
        );
        let start = Instant::now();
        let outcome = self.run(feed);
        record_ingest_duration(&self.config.name, start.elapsed());

        match &outcome {
            Ok(result) if result.success => {}
            Ok(result) => {
                record_sink_failure(&self.config.name, "source");
                tracing::warn!(
                    reason = result.debug_message.as_deref().unwrap_or_default(),
                    arguments = ?result.arguments,
                    "Ingestion stopped by source failure, transaction rolled back"
                );
            }
            Err(e) => {
                record_sink_failure(&self.config.name, "unexpected");
                tracing::error!(error = %e, "Ingestion failed, transaction rolled back");
            }
        }
        outcome
    }

    fn run<I>(&self, feed: I) -> Result<SinkResult, IngestError>
    where
        I: IntoIterator<Item = FeedItem>,
    {
        let connection = self
            .connector
            .connect(&self.config.data_source)
            .map_err(|source| IngestError::Connect {
                sink: self.config.name.clone(),
                source,
            })?;
        let cache: SinkCache = PreparedCommandCache::new(connection)?;

        let (mut producer, consumer) = accumulating_queue(self.config.throttle_size);
        let settings = WorkerSettings {
            sink: self.config.name.clone(),
            progress_interval: self.progress_interval,
        };
        let worker = IngestionWorker::new(cache, settings).spawn(consumer)?;

        let produced = self.produce(&mut producer, feed);
        let queue_joined = producer.join();
        drop(producer);

        // A writer failure is the root cause of anything the producer saw.
        let report = match worker.join() {
            Ok(report) => report,
            Err(WorkerFailure { error, cache, .. }) => {
                if let Some(mut cache) = cache {
                    self.roll_back(&mut cache);
                }
                return Err(error.into());
            }
        };

        if let Err(stop) = produced {
            let mut cache = report.cache;
            self.roll_back(&mut cache);
            return match stop {
                ProduceStop::Source(error) => {
                    Ok(SinkResult::from_source_error(&self.config.name, &error))
                }
                ProduceStop::Cancelled => Err(IngestError::Cancelled),
                ProduceStop::Queue(error) => Err(error.into()),
            };
        }
        if let Err(error) = queue_joined {
            let mut cache = report.cache;
            self.roll_back(&mut cache);
            return Err(error.into());
        }

        self.finish(report)
    }

    fn produce<I>(&self, producer: &mut QueueProducer<ReadResult>, feed: I) -> Result<(), ProduceStop>
    where
        I: IntoIterator<Item = FeedItem>,
    {
        let mut skipped = 0u64;
        for item in feed {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping feed");
                return Err(ProduceStop::Cancelled);
            }
            let item = item.map_err(ProduceStop::Source)?;
            if item.table_name().is_some_and(|table| self.excluded.contains(table)) {
                skipped += 1;
                continue;
            }
            producer.enqueue(item, ReadResult::is_file_boundary)?;
            record_pending_boundaries(&self.config.name, producer.pending_boundaries());
        }
        if skipped > 0 {
            tracing::debug!(skipped, "Skipped records of excluded tables");
        }
        Ok(())
    }

    fn finish(&self, report: WorkerReport) -> Result<SinkResult, IngestError> {
        let WorkerReport {
            published_tables,
            records,
            statements,
            files,
            mut cache,
        } = report;

        if let Err(e) = cache.commit() {
            self.roll_back(&mut cache);
            return Err(e.into());
        }
        record_commit(&self.config.name);
        cache.close();

        tracing::info!(
            records,
            statements,
            files,
            tables = ?published_tables,
            "Ingestion complete"
        );
        Ok(SinkResult::success(&self.config.name).with_arguments(published_tables))
    }

    fn roll_back(&self, cache: &mut SinkCache) {
        if let Err(e) = cache.rollback() {
            tracing::warn!(error = %e, "Rollback failed");
        }
        cache.close();
    }
}
