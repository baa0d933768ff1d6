//! Resource materialization: one resource in, one cached PDF artifact out.
//!
//! Every failure is scoped to the resource it happened on. The cache entry
//! is abandoned so a later run retries it, and the failure is returned as a
//! [`MaterializeOutcome::Failed`] value rather than an error, which keeps one
//! broken link from stopping a batch.

use std::path::Path;

use coursepack_fetch::{FetchError, Fetcher};
use coursepack_render::{
    DiagnosticPaths, RenderError, RenderRequest, RenderTarget, Renderer, TypesetStatus,
};
use coursepack_shared::{CoursepackError, PipelineContext, Resource, ResourceType};
use coursepack_storage::{ArtifactKind, ArtifactStore, CacheKey};
use tracing::{debug, info, instrument, warn};
use zip::result::ZipError;

use crate::document::{InvalidPdf, load_pdf};
use crate::scorm;

/// File the renderer prints into, inside the entry's scratch area.
const RENDER_FILE: &str = "render.pdf";

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of materializing one resource.
#[derive(Debug)]
pub enum MaterializeOutcome {
    /// A completed artifact already existed; nothing was fetched or rendered.
    Cached(ArtifactKind),
    /// A new artifact was written.
    Materialized {
        kind: ArtifactKind,
        typeset: TypesetStatus,
    },
    /// No artifact was produced.
    Failed(ResourceFailure),
}

impl MaterializeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Why a resource produced no artifact.
#[derive(Debug, thiserror::Error)]
pub enum ResourceFailure {
    #[error("download failed: {0}")]
    FetchFailed(#[source] FetchError),

    #[error("not a usable PDF: {0}")]
    InvalidArtifact(#[source] InvalidPdf),

    #[error("package extraction failed: {0}")]
    ExtractionFailed(#[source] ZipError),

    #[error("no HTML entry point in package")]
    NoEntryPoint,

    #[error("render failed: {0}")]
    RenderFailed(#[source] RenderError),

    #[error("resource type '{0}' cannot be materialized")]
    UnsupportedType(ResourceType),

    #[error("cache I/O failed: {0}")]
    CacheIo(#[source] CoursepackError),
}

impl ResourceFailure {
    /// Stable identifier used in logs and summaries.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::FetchFailed(_) => "fetch_failed",
            Self::InvalidArtifact(_) => "invalid_artifact",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::NoEntryPoint => "no_entry_point",
            Self::RenderFailed(_) => "render_failed",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::CacheIo(_) => "cache_io",
        }
    }
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// Turns resources into cache artifacts using the given collaborators.
pub struct Materializer<'a, F, R, S> {
    ctx: &'a PipelineContext,
    fetcher: &'a F,
    renderer: &'a R,
    store: &'a S,
}

impl<'a, F, R, S> Materializer<'a, F, R, S>
where
    F: Fetcher,
    R: Renderer,
    S: ArtifactStore,
{
    pub fn new(ctx: &'a PipelineContext, fetcher: &'a F, renderer: &'a R, store: &'a S) -> Self {
        Self {
            ctx,
            fetcher,
            renderer,
            store,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        self.ctx
    }

    pub fn store(&self) -> &S {
        self.store
    }

    /// Materialize the resource at canonical `position`.
    #[instrument(skip_all, fields(position = position, url = %resource.url, kind = %resource.kind))]
    pub async fn materialize(&self, position: usize, resource: &Resource) -> MaterializeOutcome {
        let key = CacheKey::new(position, &resource.url);

        if let Some(kind) = self.store.find(&key) {
            debug!(entry = %key, ?kind, "artifact already cached");
            return MaterializeOutcome::Cached(kind);
        }

        match self.produce(&key, resource).await {
            Ok((kind, typeset)) => {
                if typeset == TypesetStatus::Incomplete {
                    warn!(position, url = %resource.url, "math typesetting incomplete; artifact kept");
                }
                info!(entry = %key, ?kind, "materialized");
                MaterializeOutcome::Materialized { kind, typeset }
            }
            Err(failure) => {
                warn!(
                    position,
                    url = %resource.url,
                    reason = failure.reason(),
                    error = %failure,
                    "resource failed"
                );
                if let Err(e) = self.store.abandon(&key) {
                    warn!(entry = %key, error = %e, "could not remove failed cache entry");
                }
                MaterializeOutcome::Failed(failure)
            }
        }
    }

    async fn produce(
        &self,
        key: &CacheKey,
        resource: &Resource,
    ) -> Result<(ArtifactKind, TypesetStatus), ResourceFailure> {
        if resource.kind == ResourceType::Other {
            return Err(ResourceFailure::UnsupportedType(resource.kind));
        }

        let scratch = self.store.claim(key).map_err(ResourceFailure::CacheIo)?;

        let produced = match resource.kind {
            ResourceType::Pdf => {
                let bytes = self.fetch(&resource.url).await?;
                load_pdf(&bytes).map_err(ResourceFailure::InvalidArtifact)?;
                self.store
                    .write_artifact(key, ArtifactKind::Direct, &bytes)
                    .map_err(ResourceFailure::CacheIo)?;
                (ArtifactKind::Direct, TypesetStatus::NotPresent)
            }
            ResourceType::ScormZip => {
                let bytes = self.fetch(&resource.url).await?;
                scorm::extract(&bytes, &scratch).map_err(ResourceFailure::ExtractionFailed)?;
                let entry = scorm::resolve_entry_point(&scratch).ok_or(ResourceFailure::NoEntryPoint)?;
                let typeset = self.render(key, RenderTarget::File(entry), &scratch).await?;
                (ArtifactKind::Rendered, typeset)
            }
            ResourceType::ScormHtml | ResourceType::AgregaHtml => {
                let target = RenderTarget::Url(resource.url.clone());
                let typeset = self.render(key, target, &scratch).await?;
                (ArtifactKind::Rendered, typeset)
            }
            ResourceType::Other => return Err(ResourceFailure::UnsupportedType(resource.kind)),
        };

        self.store.release_scratch(key).map_err(ResourceFailure::CacheIo)?;
        Ok(produced)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ResourceFailure> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(ResourceFailure::FetchFailed)
    }

    async fn render(
        &self,
        key: &CacheKey,
        target: RenderTarget,
        scratch: &Path,
    ) -> Result<TypesetStatus, ResourceFailure> {
        let output = scratch.join(RENDER_FILE);
        let request = RenderRequest {
            target: &target,
            output: &output,
        };

        let report = match self.renderer.render(&request).await {
            Ok(report) => report,
            Err(e) => {
                self.capture_diagnostics(key, &target).await;
                return Err(ResourceFailure::RenderFailed(e));
            }
        };

        let bytes = std::fs::read(&output)
            .map_err(|e| ResourceFailure::CacheIo(CoursepackError::io(&output, e)))?;
        load_pdf(&bytes).map_err(ResourceFailure::InvalidArtifact)?;
        self.store
            .persist_artifact(key, ArtifactKind::Rendered, &output)
            .map_err(ResourceFailure::CacheIo)?;

        if let Some(text) = report.text {
            self.write_dump(&format!("{key}_fallback.txt"), text.as_bytes());
        }
        Ok(report.typeset)
    }

    async fn capture_diagnostics(&self, key: &CacheKey, target: &RenderTarget) {
        if let Err(e) = std::fs::create_dir_all(&self.ctx.dumps_dir) {
            warn!(dir = %self.ctx.dumps_dir.display(), error = %e, "cannot create dumps directory");
            return;
        }
        let paths = DiagnosticPaths::new(&self.ctx.dumps_dir, &key.dir_name());
        match self.renderer.capture_diagnostics(target, &paths).await {
            Ok(()) => debug!(screenshot = %paths.screenshot.display(), "diagnostics captured"),
            Err(e) => warn!(entry = %key, error = %e, "diagnostics capture failed"),
        }
    }

    /// Best effort; a dump never decides the outcome of a resource.
    fn write_dump(&self, name: &str, bytes: &[u8]) {
        let path = self.ctx.dumps_dir.join(name);
        let written = std::fs::create_dir_all(&self.ctx.dumps_dir).and_then(|()| std::fs::write(&path, bytes));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "could not write dump");
        }
    }
}
