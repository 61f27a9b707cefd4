//! Error types for the news agent.
//!
//! Library crates use [`NewsAgentError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all news agent operations.
#[derive(Debug, thiserror::Error)]
pub enum NewsAgentError {
    /// Missing secret, missing prerequisite index, or an invalid config value.
    #[error("config error: {message}")]
    Config { message: String },

    /// The persisted embedding index is missing or cannot be read.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// An external retrieval call (embedding or web search) failed.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// The text-completion provider failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// A pipeline stage ran past its wall-clock budget.
    #[error("stage '{stage}' timed out after {}s", budget.as_secs())]
    StageTimeout { stage: String, budget: Duration },

    /// A pipeline stage used all of its rounds without producing output.
    #[error("stage '{stage}' hit its iteration limit of {limit} rounds without producing output")]
    StageIterationLimit { stage: String, limit: usize },

    /// Network/HTTP error outside a tool boundary.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NewsAgentError>;

impl NewsAgentError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
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

    /// Whether this error ends a pipeline stage because a bound was exceeded.
    pub fn is_stage_bound(&self) -> bool {
        matches!(
            self,
            Self::StageTimeout { .. } | Self::StageIterationLimit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NewsAgentError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = NewsAgentError::validation("temperature 1.5 out of range");
        assert!(err.to_string().contains("temperature 1.5"));
    }

    #[test]
    fn stage_errors_name_the_stage_and_bound() {
        let err = NewsAgentError::StageIterationLimit {
            stage: "research".into(),
            limit: 3,
        };
        assert!(err.is_stage_bound());
        assert!(err.to_string().contains("research"));
        assert!(err.to_string().contains("3 rounds"));

        let err = NewsAgentError::StageTimeout {
            stage: "writing".into(),
            budget: Duration::from_secs(240),
        };
        assert!(err.is_stage_bound());
        assert!(err.to_string().contains("240s"));

        assert!(!NewsAgentError::Generation("boom".into()).is_stage_bound());
    }
}
