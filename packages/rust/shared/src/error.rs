//! Error types for docmodules.
//!
//! Library crates use [`DocModulesError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docmodules operations.
#[derive(Debug, thiserror::Error)]
pub enum DocModulesError {
    /// Fatal configuration problem: bad flags, no reachable seed, no usable model.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network, timeout, or HTTP failure while fetching a single page.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Model output that could not be recovered into JSON.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Page cache read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A model call exceeded its ceiling.
    #[error("model `{model}` timed out after {secs}s")]
    ModelTimeout { model: String, secs: u64 },

    /// The model is not installed or the inference server is unreachable.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Any other inference backend failure.
    #[error("model error: {0}")]
    Model(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Extraction produced nothing usable for any document.
    #[error("no documents were extracted: {0}")]
    NoResults(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocModulesError>;

impl DocModulesError {
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

    /// Whether this error came from invoking the model (as opposed to parsing its output).
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelTimeout { .. } | Self::ModelUnavailable(_) | Self::Model(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocModulesError::config("no reachable seed URLs");
        assert_eq!(err.to_string(), "config error: no reachable seed URLs");

        let err = DocModulesError::ModelTimeout {
            model: "llama3.1".into(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "model `llama3.1` timed out after 30s");
    }

    #[test]
    fn model_failures_are_classified() {
        assert!(DocModulesError::ModelUnavailable("phi3".into()).is_model_failure());
        assert!(DocModulesError::Model("boom".into()).is_model_failure());
        assert!(!DocModulesError::parse("bad json").is_model_failure());
        assert!(!DocModulesError::Fetch("dns".into()).is_model_failure());
    }
}
