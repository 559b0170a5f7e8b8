//! Configuration parsing for Stowage.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - One primary sink plus an optional secondary sink

use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::queue::MAX_CAPACITY;
use crate::pipeline::FailurePolicy;
use crate::schema::is_valid_identifier;
use crate::storage::Backend;

/// Default queue capacity per sink.
pub const DEFAULT_THROTTLE_SIZE: usize = 1000;

/// Largest accepted throttle size.
pub const MAX_THROTTLE_SIZE: usize = MAX_CAPACITY;

/// Error type for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sink '{0}': throttle size must be between 1 and {max}", max = MAX_THROTTLE_SIZE)]
    InvalidThrottleSize(String),

    #[error("sink '{0}': data source must not be empty")]
    EmptyDataSource(String),

    #[error("backend '{0}' is not available in this build")]
    BackendUnavailable(Backend),

    #[error("invalid excluded table name: '{0}'")]
    InvalidTableName(String),
}

/// Stowage: batched, transactional ingestion of record feeds into relational stores.
#[derive(Parser, Debug, Clone)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// JSON-lines feed file to ingest
    #[arg(long, env = "STOWAGE_FEED")]
    pub feed: PathBuf,

    /// Data source of the primary sink (file path or ":memory:")
    #[arg(long, env = "STOWAGE_DATA_SOURCE", default_value = "./stowage.db")]
    pub data_source: String,

    /// Backend of the primary sink
    #[arg(long, env = "STOWAGE_BACKEND", value_enum, default_value_t = Backend::Sqlite)]
    pub backend: Backend,

    /// Items buffered per sink before the feed reader blocks
    #[arg(long, env = "STOWAGE_THROTTLE_SIZE", default_value_t = DEFAULT_THROTTLE_SIZE)]
    pub throttle_size: usize,

    /// Data source of the secondary sink; no secondary sink when unset
    #[arg(long, env = "STOWAGE_SECONDARY_DATA_SOURCE")]
    pub secondary_data_source: Option<String>,

    /// Backend of the secondary sink
    #[arg(long, env = "STOWAGE_SECONDARY_BACKEND", value_enum, default_value_t = Backend::DuckDb)]
    pub secondary_backend: Backend,

    /// Throttle size of the secondary sink (defaults to --throttle-size)
    #[arg(long, env = "STOWAGE_SECONDARY_THROTTLE_SIZE")]
    pub secondary_throttle_size: Option<usize>,

    /// Downgrade secondary sink failures to warnings
    #[arg(long, env = "STOWAGE_CONTINUE_ON_SECONDARY_ERROR")]
    pub continue_on_secondary_error: bool,

    /// Table whose records are skipped by every sink (repeatable)
    #[arg(long = "exclude-table", env = "STOWAGE_EXCLUDE_TABLES", value_delimiter = ',')]
    pub excluded_tables: Vec<String>,

    /// Log filter directives (trace, debug, info, warn, error, or EnvFilter syntax)
    #[arg(long, env = "RUST_LOG", default_value = "info,stowage=debug")]
    pub log_level: String,

    /// Write logs as JSON lines
    #[arg(long, env = "STOWAGE_LOG_JSON")]
    pub log_json: bool,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

/// Validated settings of one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Name used in logs, metrics and results.
    pub name: String,
    pub backend: Backend,
    /// Connection string passed to the backend's connector.
    pub data_source: String,
    /// Queue capacity; queues clamp it to [`MAX_THROTTLE_SIZE`].
    pub throttle_size: NonZeroUsize,
    /// Tables whose records are never enqueued for this sink.
    pub excluded_tables: Vec<String>,
}

impl SinkConfig {
    pub fn new(name: impl Into<String>, backend: Backend, data_source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend,
            data_source: data_source.into(),
            throttle_size: NonZeroUsize::new(DEFAULT_THROTTLE_SIZE).unwrap_or(NonZeroUsize::MIN),
            excluded_tables: Vec::new(),
        }
    }

    pub fn with_throttle_size(mut self, throttle_size: NonZeroUsize) -> Self {
        self.throttle_size = throttle_size;
        self
    }

    pub fn with_excluded_table(mut self, table: impl Into<String>) -> Self {
        self.excluded_tables.push(table.into());
        self
    }
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validated sink settings, primary first.
    ///
    /// The primary sink's policy is always [`FailurePolicy::Fatal`]; the
    /// secondary's follows `--continue-on-secondary-error`.
    pub fn sinks(&self) -> Result<Vec<(SinkConfig, FailurePolicy)>, ConfigError> {
        if let Some(table) = self.excluded_tables.iter().find(|t| !is_valid_identifier(t)) {
            return Err(ConfigError::InvalidTableName(table.clone()));
        }

        let primary_name = self.backend.to_string();
        let mut sinks = vec![(
            self.sink(
                primary_name.clone(),
                self.backend,
                &self.data_source,
                self.throttle_size,
            )?,
            FailurePolicy::Fatal,
        )];

        if let Some(data_source) = &self.secondary_data_source {
            let mut name = self.secondary_backend.to_string();
            if name == primary_name {
                name.push_str("-secondary");
            }
            let throttle = self.secondary_throttle_size.unwrap_or(self.throttle_size);
            sinks.push((
                self.sink(name, self.secondary_backend, data_source, throttle)?,
                FailurePolicy::from_continue_flag(self.continue_on_secondary_error),
            ));
        }

        Ok(sinks)
    }

    fn sink(
        &self,
        name: String,
        backend: Backend,
        data_source: &str,
        throttle_size: usize,
    ) -> Result<SinkConfig, ConfigError> {
        if !backend_available(backend) {
            return Err(ConfigError::BackendUnavailable(backend));
        }
        if data_source.trim().is_empty() {
            return Err(ConfigError::EmptyDataSource(name));
        }
        let Some(throttle_size) =
            NonZeroUsize::new(throttle_size).filter(|t| t.get() <= MAX_THROTTLE_SIZE)
        else {
            return Err(ConfigError::InvalidThrottleSize(name));
        };

        Ok(SinkConfig {
            name,
            backend,
            data_source: data_source.to_string(),
            throttle_size,
            excluded_tables: self.excluded_tables.clone(),
        })
    }

    /// Create a configuration for testing.
    #[cfg(test)]
    pub fn test_config(feed: PathBuf, data_source: &str) -> Self {
        Self {
            feed,
            data_source: data_source.into(),
            throttle_size: 16,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

fn backend_available(backend: Backend) -> bool {
    match backend {
        Backend::Sqlite => true,
        Backend::DuckDb => cfg!(feature = "duckdb"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: PathBuf::from("./feed.jsonl"),
            data_source: "./stowage.db".into(),
            backend: Backend::Sqlite,
            throttle_size: DEFAULT_THROTTLE_SIZE,
            secondary_data_source: None,
            secondary_backend: Backend::DuckDb,
            secondary_throttle_size: None,
            continue_on_secondary_error: false,
            excluded_tables: Vec::new(),
            log_level: "info,stowage=debug".into(),
            log_json: false,
            otel_endpoint: None,
        }
    }
}
