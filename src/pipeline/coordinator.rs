//! Multi-sink coordinator.
//!
//! Runs one primary sink and any number of secondary sinks in parallel over
//! the same replayable feed. Every sink reads its own pass of the feed on a
//! blocking task; the coordinator waits for all of them before deciding the
//! overall outcome.

use futures::future::{join, join_all};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;

use super::{IngestError, SingleSinkOperator, SinkResult};
use crate::feed::FeedSource;

/// What a sink's failure means for the overall run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The sink's failure becomes the overall result.
    #[default]
    Fatal,
    /// The sink's failure is logged and recorded as a warning only.
    WarnAndContinue,
}

impl FailurePolicy {
    pub fn from_continue_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            Self::WarnAndContinue
        } else {
            Self::Fatal
        }
    }
}

type SinkOutcome = Result<SinkResult, IngestError>;

/// Fans one feed out to a primary sink and its secondaries.
pub struct MultiSinkCoordinator {
    primary: Arc<SingleSinkOperator>,
    secondaries: Vec<(Arc<SingleSinkOperator>, FailurePolicy)>,
}

impl MultiSinkCoordinator {
    /// The primary's failure is always fatal; each secondary has its own policy.
    pub fn new(
        primary: SingleSinkOperator,
        secondaries: Vec<(SingleSinkOperator, FailurePolicy)>,
    ) -> Self {
        Self {
            primary: Arc::new(primary),
            secondaries: secondaries
                .into_iter()
                .map(|(sink, policy)| (Arc::new(sink), policy))
                .collect(),
        }
    }

    pub fn sink_count(&self) -> usize {
        1 + self.secondaries.len()
    }

    /// Ingest `feed` into every sink concurrently.
    ///
    /// Returns the primary's result (with downgraded secondary failures as
    /// warnings) when the primary and every fatal secondary succeeded;
    /// otherwise the first failing outcome, primary first.
    pub async fn ingest_all(&self, feed: Arc<dyn FeedSource>) -> SinkOutcome {
        let start = Instant::now();
        tracing::info!(
            primary = self.primary.name(),
            secondaries = self.secondaries.len(),
            "Starting parallel ingestion"
        );

        let spawn = |sink: &Arc<SingleSinkOperator>| {
            let sink = Arc::clone(sink);
            let feed = Arc::clone(&feed);
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                let _guard = span.enter();
                sink.ingest_all(feed.read())
            })
        };
        let primary_task = spawn(&self.primary);
        let secondary_tasks: Vec<_> = self.secondaries.iter().map(|(sink, _)| spawn(sink)).collect();

        let (primary, secondaries) = join(primary_task, join_all(secondary_tasks)).await;
        let flatten = |joined: Result<SinkOutcome, JoinError>| {
            joined.map_err(IngestError::from).and_then(|outcome| outcome)
        };
        let outcome = self.evaluate(flatten(primary), secondaries.into_iter().map(flatten));

        tracing::info!(
            success = outcome.as_ref().is_ok_and(|r| r.success),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Parallel ingestion finished"
        );
        outcome
    }

    fn evaluate(
        &self,
        primary: SinkOutcome,
        secondaries: impl Iterator<Item = SinkOutcome>,
    ) -> SinkOutcome {
        let mut result = match primary {
            Ok(result) if result.success => result,
            failed => {
                tracing::error!(
                    sink = self.primary.name(),
                    reason = %describe(&failed),
                    "Primary sink failed"
                );
                return failed;
            }
        };

        for ((sink, policy), outcome) in self.secondaries.iter().zip(secondaries) {
            if matches!(&outcome, Ok(r) if r.success) {
                continue;
            }
            let reason = describe(&outcome);
            match policy {
                FailurePolicy::WarnAndContinue => {
                    tracing::warn!(
                        sink = sink.name(),
                        reason = %reason,
                        "Secondary sink failed, continuing"
                    );
                    result = result.with_warning(format!("{} failed: {}", sink.name(), reason));
                }
                FailurePolicy::Fatal => {
                    tracing::error!(sink = sink.name(), reason = %reason, "Secondary sink failed");
                    return outcome;
                }
            }
        }

        Ok(result)
    }
}

fn describe(outcome: &SinkOutcome) -> String {
    match outcome {
        Ok(result) => result
            .debug_message
            .clone()
            .unwrap_or_else(|| "unsuccessful result".to_string()),
        Err(e) => e.to_string(),
    }
}
