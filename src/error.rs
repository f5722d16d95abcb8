//! Error types for prompt chain execution.

use thiserror::Error;

/// A failure reported by a text-generation backend.
///
/// The executor treats this as opaque: it is never inspected, classified or
/// retried, only attached to the step that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    /// Human-readable cause.
    pub message: String,
    /// HTTP status returned by the backend, when there was one.
    pub status: Option<u16>,
}

impl GenerationError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Create an error carrying the backend's HTTP status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// The main error type for prompt chain operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A step's generation call failed and the run was aborted.
    #[error("step {step} failed: {source}")]
    StepFailed {
        /// Zero-based index of the failing step.
        step: usize,
        /// The backend failure.
        #[source]
        source: GenerationError,
    },

    /// The run was cancelled before it could finish.
    #[error("run cancelled at step {step}")]
    Cancelled {
        /// Zero-based index of the step that was pending or in flight.
        step: usize,
    },

    /// The telemetry pipeline could not be built.
    #[error("export error: {0}")]
    Export(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for prompt chain operations.
pub type Result<T> = std::result::Result<T, Error>;
