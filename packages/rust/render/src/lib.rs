//! Headless-browser capture of web content to PDF.
//!
//! The materializer depends on the [`Renderer`] trait only. [`ChromeRenderer`]
//! is the production implementation; it waits for in-page math typesetting
//! within a bounded budget and reports whether it finished, so a slow
//! formula engine degrades quality instead of failing the resource.

mod chrome;
mod dom;
mod error;
mod print;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

pub use chrome::ChromeRenderer;
pub use error::RenderError;

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// What to load in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// A remote page.
    Url(String),
    /// A local HTML entry point, e.g. inside an extracted package.
    File(PathBuf),
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One capture: load `target`, print to `output`.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub target: &'a RenderTarget,
    pub output: &'a Path,
}

/// Whether math typesetting finished before the page was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypesetStatus {
    /// The page does not typeset math.
    NotPresent,
    /// Typesetting finished.
    Complete,
    /// The budget ran out; the capture may show raw TeX.
    Incomplete,
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub typeset: TypesetStatus,
    /// Visible body text, kept as a fallback for text-poor PDFs.
    pub text: Option<String>,
}

/// Where to store diagnostics after a failed capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticPaths {
    pub screenshot: PathBuf,
    pub content: PathBuf,
}

impl DiagnosticPaths {
    /// `<dir>/<base>.png` and `<dir>/<base>.html`.
    pub fn new(dir: &Path, base: &str) -> Self {
        Self {
            screenshot: dir.join(format!("{base}.png")),
            content: dir.join(format!("{base}.html")),
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Capture web content as PDF.
pub trait Renderer {
    /// Print the target to `request.output`.
    fn render(
        &self,
        request: &RenderRequest<'_>,
    ) -> impl Future<Output = Result<RenderReport, RenderError>> + Send;

    /// Save a screenshot and the page content for a failed target.
    /// Best effort; callers log and ignore the error.
    fn capture_diagnostics(
        &self,
        target: &RenderTarget,
        paths: &DiagnosticPaths,
    ) -> impl Future<Output = Result<(), RenderError>> + Send;
}
