//! Error types for paper-agent.
//!
//! Library crates use [`PaperAgentError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and maps variants to exit codes.

use std::path::PathBuf;

/// Top-level error type for all paper-agent operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperAgentError {
    /// Fatal configuration error, raised before any stage work starts.
    #[error("config error: {message}")]
    Config { message: String },

    /// Per-item network or API failure (one paper, one venue page, one LLM call).
    #[error("upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    /// Too many items in a stage failed.
    #[error("{stage}: {failed} of {total} items failed")]
    PartialBatch {
        stage: String,
        failed: usize,
        total: usize,
    },

    /// Missing credential or external tool.
    #[error("environment error: {0}")]
    Environment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Response or artifact parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (bad artifact shape, empty input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperAgentError>;

impl PaperAgentError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// An upstream failure worth retrying (timeout, connect error, 429, 5xx).
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            retryable: true,
        }
    }

    /// An upstream failure that will not improve on retry (404, wrong content type).
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { retryable: true, .. })
    }
}
