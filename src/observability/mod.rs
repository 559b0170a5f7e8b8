//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging to stderr (text or JSON lines)
//! - OTLP metrics for ingestion runs

pub mod metrics;
pub mod tracing;
