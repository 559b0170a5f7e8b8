//! Stowage: batched, transactional ingestion of record feeds.
//!
//! # Usage
//!
//! ```bash
//! stowage --feed races.jsonl --data-source races.db \
//!         --secondary-data-source races.duckdb --continue-on-secondary-error
//! ```
//!
//! Environment variables can also be used:
//! - `STOWAGE_FEED`: Feed file to ingest
//! - `STOWAGE_DATA_SOURCE`: Primary sink data source
//! - `RUST_LOG`: Log filter
//!
//! The run result is printed to stdout as JSON. The exit code is 0 on
//! success, 1 when the run reported a failure and 2 on an unexpected error.

use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use stowage::config::{Config, SinkConfig};
use stowage::feed::{FeedSource, JsonLinesFeed};
use stowage::observability::metrics::init_metrics_with_endpoint;
use stowage::observability::tracing::init_tracing;
use stowage::pipeline::{FailurePolicy, MultiSinkCoordinator, SingleSinkOperator};
use stowage::storage::Connector;
use tokio_util::sync::CancellationToken;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let secondary = match &config.secondary_data_source {
        Some(data_source) => format!("{} ({})", data_source, config.secondary_backend),
        None => "none".to_string(),
    };
    eprintln!(
        r#"
  Stowage v{}

  Configuration:
    Feed:       {}
    Primary:    {} ({})
    Secondary:  {}
    Throttle:   {}
"#,
        version,
        config.feed.display(),
        config.data_source,
        config.backend,
        secondary,
        config.throttle_size
    );
}

/// Cancel `token` on SIGINT (Ctrl+C) or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), cancelling ingestion...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, cancelling ingestion...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    if ctrl_c.await.is_err() {
                        return;
                    }
                    tracing::info!("Received SIGINT (Ctrl+C), cancelling ingestion...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if ctrl_c.await.is_err() {
                return;
            }
            tracing::info!("Received Ctrl+C, cancelling ingestion...");
        }

        token.cancel();
    });
}

fn build_coordinator(
    sinks: Vec<(SinkConfig, FailurePolicy)>,
    cancel: &CancellationToken,
) -> anyhow::Result<MultiSinkCoordinator> {
    let mut operators = sinks.into_iter().map(|(sink, policy)| {
        let connector: Arc<dyn Connector> = Arc::new(sink.backend);
        let operator = SingleSinkOperator::new(sink, connector).with_cancellation(cancel.clone());
        (operator, policy)
    });
    let (primary, _) = operators.next().context("no sink configured")?;
    Ok(MultiSinkCoordinator::new(primary, operators.collect()))
}

async fn run(config: Config) -> anyhow::Result<bool> {
    let sinks = config.sinks().context("invalid sink configuration")?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let coordinator = build_coordinator(sinks, &cancel)?;
    let feed: Arc<dyn FeedSource> = Arc::new(JsonLinesFeed::new(&config.feed));
    let result = coordinator
        .ingest_all(feed)
        .await
        .context("ingestion failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_json);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());
    print_banner(&config);

    match run(config).await {
        Ok(true) => {
            tracing::info!("Stowage run complete");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("Stowage run failed: {e:#}");
            eprintln!("stowage: {e:#}");
            ExitCode::from(2)
        }
    }
}
