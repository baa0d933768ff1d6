//! Error types for coursepack.
//!
//! Library crates use [`CoursepackError`] via `thiserror` for failures that
//! abort a whole invocation. Failures scoped to a single resource or a single
//! QA check never use this type; see `ResourceFailure` in `coursepack-core`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level fatal error type for coursepack operations.
#[derive(Debug, thiserror::Error)]
pub enum CoursepackError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A precondition for the invocation is missing (manifest, cache root, merged document).
    #[error("setup error: {message}")]
    Setup { message: String },

    /// Network/HTTP client construction error.
    #[error("network error: {0}")]
    Network(String),

    /// Data validation error (manifest shape, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The manifest order differs from the order the cache was built with.
    #[error(
        "manifest ordering changed since the cache was built (recorded {recorded}, current {current}); \
         cached positions would refer to the wrong resources"
    )]
    OrderingMismatch { recorded: String, current: String },

    /// PDF serialization error while writing the merged document.
    #[error("pdf error: {0}")]
    Pdf(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CoursepackError>;

impl CoursepackError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a setup error from any displayable message.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CoursepackError::setup("manifest not found for 'biologia'");
        assert_eq!(err.to_string(), "setup error: manifest not found for 'biologia'");

        let err = CoursepackError::validation("resource 3 belongs to unit 'U2'");
        assert!(err.to_string().contains("resource 3"));
    }

    #[test]
    fn ordering_mismatch_names_both_fingerprints() {
        let err = CoursepackError::OrderingMismatch {
            recorded: "aaaa".into(),
            current: "bbbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
    }
}
