//! Structured outcome of an ingestion run.

use serde::Serialize;

use crate::feed::SourceError;

/// Outcome reported to callers, for logging and programmatic checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkResult {
    /// Name of the sink that produced the result.
    pub operation_name: String,
    pub success: bool,
    /// Failure description; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_message: Option<String>,
    /// Published tables on success, source error arguments on failure.
    pub arguments: Vec<String>,
    /// Failures of secondary sinks that were downgraded to warnings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SinkResult {
    pub fn success(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            success: true,
            debug_message: None,
            arguments: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failure(operation_name: impl Into<String>, debug_message: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            success: false,
            debug_message: Some(debug_message.into()),
            arguments: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Failed result carrying the source's message and arguments.
    pub fn from_source_error(operation_name: impl Into<String>, error: &SourceError) -> Self {
        Self::failure(operation_name, error.to_string()).with_arguments(error.arguments.clone())
    }

    pub fn with_arguments(mut self, arguments: impl IntoIterator<Item = String>) -> Self {
        self.arguments.extend(arguments);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}
