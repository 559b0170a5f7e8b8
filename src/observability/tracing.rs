//! Structured logging setup.
//!
//! Logs always go to stderr: stdout is reserved for the run result.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when the configured directives do not parse.
pub const DEFAULT_FILTER: &str = "info,stowage=debug";

/// Initialize logging.
///
/// `directives` uses `EnvFilter` syntax (`info`, `stowage=trace`, ...).
/// With `json` set, every event is written as one JSON object per line.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(directives: &str, json: bool) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    tracing::debug!(filter = directives, "Tracing initialized");
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
