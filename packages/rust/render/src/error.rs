//! Render error types.

use std::path::PathBuf;

/// Why a page could not be captured.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// No usable Chrome/Chromium executable; says where we looked.
    #[error("no Chrome/Chromium browser available: {0}")]
    ChromeNotFound(String),

    /// The browser did not finish within the configured limit.
    #[error("chrome timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The browser exited unsuccessfully.
    /// A missing exit code means it was killed by a signal.
    #[error("chrome exited with code {code:?}: {stderr}")]
    ChromeFailed { code: Option<i32>, stderr: String },

    /// The browser exited cleanly but produced no document.
    #[error("no output produced at {0:?}")]
    NoOutput(PathBuf),

    /// The target could not be expressed as a URL.
    #[error("invalid render target: {0}")]
    InvalidTarget(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RenderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
