//! Error types for layersync-core
//!
//! Two families live here:
//!
//! - [`SyncError`]: the failure taxonomy carried *inside* result records.
//!   Reconciliation entry points never return `Err`; a failed verification is
//!   data attached to a [`VerificationResult`](crate::visibility::VerificationResult).
//! - [`Error`]: ambient failures (config loading, logging setup) that do
//!   propagate through `?`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for layersync-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A scheduled operation reported failure
    #[error("Operation failed: {0}")]
    Operation(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read config: {0}")]
    ReadFailed(String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Error raised by a [`Renderer`](crate::renderer::Renderer) call.
///
/// The renderer is foreign code; all we keep is its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RendererError {
    pub message: String,
}

impl RendererError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Renderer handle missing. Never retried.
    Unavailable,
    /// Named layer or source absent. Retryable across attempts.
    NotFound,
    /// Polled state never converged within budget.
    Timeout,
    /// The renderer raised an error.
    Thrown,
}

/// Failure carried by reconciliation results.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Renderer unavailable")]
    Unavailable,

    #[error("Layer {layer_id} not found")]
    LayerNotFound { layer_id: String },

    #[error("Source {source_id} not found")]
    SourceNotFound { source_id: String },

    #[error("Visibility verification timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Renderer error: {message}")]
    Renderer { message: String },

    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SyncError> },
}

impl SyncError {
    #[must_use]
    pub fn layer_not_found(layer_id: impl Into<String>) -> Self {
        Self::LayerNotFound {
            layer_id: layer_id.into(),
        }
    }

    #[must_use]
    pub fn source_not_found(source_id: impl Into<String>) -> Self {
        Self::SourceNotFound {
            source_id: source_id.into(),
        }
    }

    /// Classify this failure. Exhausted retries report the kind of the last attempt.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unavailable => FailureKind::Unavailable,
            Self::LayerNotFound { .. } | Self::SourceNotFound { .. } => FailureKind::NotFound,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Renderer { .. } => FailureKind::Thrown,
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), FailureKind::Unavailable)
    }
}

impl From<RendererError> for SyncError {
    fn from(err: RendererError) -> Self {
        Self::Renderer {
            message: err.message,
        }
    }
}
