//! OTLP metrics for ingestion runs.
//!
//! Key metrics:
//! - stowage_records_ingested_total: Counter of records written, per sink
//! - stowage_commits_total: Counter of committed transactions, per sink
//! - stowage_sink_failures_total: Counter of failed sink runs, per sink and kind
//! - stowage_ingest_duration_seconds: Histogram of whole-run duration, per sink
//! - stowage_queue_pending_boundaries: Gauge of file boundaries waiting in a sink's queue

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;
use std::time::Duration;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Stowage metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of records written, per sink.
    pub records_ingested: Counter<u64>,
    /// Total number of committed transactions, per sink.
    pub commits: Counter<u64>,
    /// Total number of failed sink runs, per sink and failure kind.
    pub sink_failures: Counter<u64>,
    /// Duration of whole ingestion runs in seconds.
    pub ingest_duration: Histogram<f64>,
    /// File boundaries enqueued but not yet consumed by the writer.
    pub pending_boundaries: Gauge<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            records_ingested: meter
                .u64_counter("stowage_records_ingested_total")
                .with_description("Records written to a sink")
                .with_unit("1")
                .init(),
            commits: meter
                .u64_counter("stowage_commits_total")
                .with_description("Transactions committed by a sink")
                .with_unit("1")
                .init(),
            sink_failures: meter
                .u64_counter("stowage_sink_failures_total")
                .with_description("Sink runs that ended in failure")
                .with_unit("1")
                .init(),
            ingest_duration: meter
                .f64_histogram("stowage_ingest_duration_seconds")
                .with_description("Duration of a sink run from connect to final commit or rollback")
                .with_unit("s")
                .init(),
            pending_boundaries: meter
                .u64_gauge("stowage_queue_pending_boundaries")
                .with_description("File boundaries buffered in a sink's queue")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system. Subsequent calls are ignored.
///
/// With an endpoint, metrics are exported over OTLP/gRPC every 10 seconds;
/// without one they are recorded into a manual reader and never exported.
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics will not be exported");
                    install_manual_reader();
                }
            }
        } else {
            install_manual_reader();
        }

        Metrics::new(&global::meter("stowage"))
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// The global registry, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn sink_attrs(sink: &str) -> [KeyValue; 1] {
    [KeyValue::new("sink", sink.to_string())]
}

pub fn record_records(sink: &str, records: u64) {
    if records == 0 {
        return;
    }
    if let Some(m) = METRICS.get() {
        m.records_ingested.add(records, &sink_attrs(sink));
    }
}

pub fn record_commit(sink: &str) {
    if let Some(m) = METRICS.get() {
        m.commits.add(1, &sink_attrs(sink));
    }
}

/// `kind` is `source` for feed failures and `unexpected` for everything else.
pub fn record_sink_failure(sink: &str, kind: &'static str) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("sink", sink.to_string()),
            KeyValue::new("kind", kind),
        ];
        m.sink_failures.add(1, &attrs);
    }
}

pub fn record_ingest_duration(sink: &str, elapsed: Duration) {
    if let Some(m) = METRICS.get() {
        m.ingest_duration.record(elapsed.as_secs_f64(), &sink_attrs(sink));
    }
}

pub fn record_pending_boundaries(sink: &str, pending: usize) {
    if let Some(m) = METRICS.get() {
        m.pending_boundaries.record(pending as u64, &sink_attrs(sink));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_recording_does_not_panic() {
        init_metrics();
        record_records("sqlite", 10);
        record_records("sqlite", 0);
        record_commit("sqlite");
        record_sink_failure("duckdb", "unexpected");
        record_ingest_duration("sqlite", Duration::from_millis(250));
        record_pending_boundaries("sqlite", 2);
    }
}
