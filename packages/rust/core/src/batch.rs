//! Batch orchestration: materialize a contiguous slice of the manifest.
//!
//! Positions are processed strictly in order, one at a time. Resuming is
//! nothing more than running the same slice again: completed positions are
//! cache hits and cost no network or browser work.

use std::ops::Range;
use std::time::{Duration, Instant};

use coursepack_fetch::Fetcher;
use coursepack_render::{Renderer, TypesetStatus};
use coursepack_shared::{Manifest, Resource, Result};
use coursepack_storage::ArtifactStore;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::materializer::{MaterializeOutcome, Materializer};
use crate::ordering::ensure_ordering;

/// A resource that produced no artifact in this batch.
#[derive(Debug, Clone, Serialize)]
pub struct FailedResource {
    pub position: usize,
    pub unit: String,
    pub title: String,
    pub url: String,
    pub reason: &'static str,
    pub message: String,
}

/// What a batch did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub range: Range<usize>,
    pub materialized: usize,
    pub cached: usize,
    pub failed: Vec<FailedResource>,
    /// Positions whose artifact was kept although typesetting did not finish.
    pub incomplete_typeset: Vec<usize>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.materialized + self.cached + self.failed.len()
    }
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called once with the slice about to be processed.
    fn batch_started(&self, range: &Range<usize>, total: usize);
    /// Called before each resource.
    fn resource_started(&self, position: usize, resource: &Resource);
    /// Called after each resource.
    fn resource_finished(&self, position: usize, outcome: &MaterializeOutcome);
    /// Called when the batch completes.
    fn done(&self, summary: &BatchSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_started(&self, _range: &Range<usize>, _total: usize) {}
    fn resource_started(&self, _position: usize, _resource: &Resource) {}
    fn resource_finished(&self, _position: usize, _outcome: &MaterializeOutcome) {}
    fn done(&self, _summary: &BatchSummary) {}
}

/// Clamp `start .. start + count` to the manifest.
pub fn batch_range(start: usize, count: usize, len: usize) -> Range<usize> {
    let start = start.min(len);
    start..start.saturating_add(count).min(len)
}

/// Materialize positions `start .. min(start + count, len)`.
///
/// Fails only on setup problems (ordering mismatch, unusable cache);
/// per-resource failures are collected in the summary.
#[instrument(skip_all, fields(subject = %materializer.context().subject, start = start, count = count))]
pub async fn run_batch<F, R, S>(
    materializer: &Materializer<'_, F, R, S>,
    manifest: &Manifest,
    start: usize,
    count: usize,
    progress: &dyn ProgressReporter,
) -> Result<BatchSummary>
where
    F: Fetcher,
    R: Renderer,
    S: ArtifactStore,
{
    let started = Instant::now();
    let total = manifest.resource_count();

    ensure_ordering(materializer.store(), manifest)?;

    let range = batch_range(start, count, total);
    let mut summary = BatchSummary {
        range: range.clone(),
        ..BatchSummary::default()
    };

    if range.is_empty() {
        warn!(start, total, "start index is past the end of the manifest; nothing to do");
        summary.elapsed = started.elapsed();
        progress.done(&summary);
        return Ok(summary);
    }

    info!(from = range.start, to = range.end, total, "starting batch");
    progress.batch_started(&range, total);

    let resources = manifest.resources();

    for position in range.clone() {
        let resource = &resources[position];
        progress.resource_started(position, resource);

        let outcome = materializer.materialize(position, resource).await;
        match &outcome {
            MaterializeOutcome::Cached(_) => summary.cached += 1,
            MaterializeOutcome::Materialized { typeset, .. } => {
                summary.materialized += 1;
                if *typeset == TypesetStatus::Incomplete {
                    summary.incomplete_typeset.push(position);
                }
            }
            MaterializeOutcome::Failed(failure) => summary.failed.push(FailedResource {
                position,
                unit: resource.unit.clone(),
                title: resource.text.clone(),
                url: resource.url.clone(),
                reason: failure.reason(),
                message: failure.to_string(),
            }),
        }
        progress.resource_finished(position, &outcome);
    }

    summary.elapsed = started.elapsed();
    info!(
        materialized = summary.materialized,
        cached = summary.cached,
        failed = summary.failed.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "batch complete"
    );
    progress.done(&summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::sample_pdf;
    use crate::testing::{FakeFetcher, FakeRenderer, context, two_unit_manifest};
    use coursepack_render::ChromeRenderer;
    use coursepack_shared::{CoursepackError, RenderConfig, ResourceType};
    use coursepack_storage::{ArtifactKind, CacheKey, FsArtifactStore};

    const KINDS: [ResourceType; 4] = [
        ResourceType::Pdf,
        ResourceType::ScormHtml,
        ResourceType::AgregaHtml,
        ResourceType::Pdf,
    ];

    fn fetcher() -> FakeFetcher {
        FakeFetcher::default()
            .with("https://recursos.example.org/0", sample_pdf(1, 500, None))
            .with("https://recursos.example.org/3", sample_pdf(2, 500, None))
    }

    #[test]
    fn range_is_clamped() {
        assert_eq!(batch_range(0, 10, 4), 0..4);
        assert_eq!(batch_range(2, 1, 4), 2..3);
        assert_eq!(batch_range(4, 10, 4), 4..4);
        assert_eq!(batch_range(9, 10, 4), 4..4);
        assert_eq!(batch_range(1, usize::MAX, 4), 1..4);
    }

    #[tokio::test]
    async fn slices_resume_without_rework() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "fisica");
        let manifest = two_unit_manifest(KINDS);
        let fetcher = fetcher();
        let renderer = FakeRenderer::default();
        let store = FsArtifactStore::create(&ctx.cache_dir).unwrap();

        let first = run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &manifest, 0, 2, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.range, 0..2);
        assert_eq!(first.materialized, 2);

        let all = run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &manifest, 0, 10, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(all.cached, 2);
        assert_eq!(all.materialized, 2);
        assert!(all.failed.is_empty());
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(renderer.calls(), 2);

        for (position, resource) in manifest.resources().iter().enumerate() {
            assert!(store.find(&CacheKey::new(position, &resource.url)).is_some());
        }
        assert_eq!(
            store.find(&CacheKey::new(1, &manifest.resources()[1].url)),
            Some(ArtifactKind::Rendered)
        );
    }

    #[tokio::test]
    async fn failures_are_collected_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "fisica");
        let manifest = two_unit_manifest(KINDS);
        // Position 0 has no body: the fetch 404s.
        let fetcher = FakeFetcher::default().with("https://recursos.example.org/3", sample_pdf(1, 500, None));
        let renderer = FakeRenderer {
            failing: vec!["recursos.example.org/2".into()],
            typeset: TypesetStatus::Incomplete,
            ..FakeRenderer::default()
        };
        let store = FsArtifactStore::create(&ctx.cache_dir).unwrap();

        let summary = run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &manifest, 0, 10, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.processed(), 4);
        assert_eq!(summary.materialized, 2);
        let reasons: Vec<(usize, &str)> = summary.failed.iter().map(|f| (f.position, f.reason)).collect();
        assert_eq!(reasons, vec![(0, "fetch_failed"), (2, "render_failed")]);
        assert_eq!(summary.incomplete_typeset, vec![1]);
    }

    #[tokio::test]
    async fn pdfs_materialize_without_a_browser() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "fisica");
        let manifest = two_unit_manifest([
            ResourceType::Pdf,
            ResourceType::AgregaHtml,
            ResourceType::Pdf,
            ResourceType::Pdf,
        ]);
        let fetcher = FakeFetcher::default()
            .with("https://recursos.example.org/0", sample_pdf(1, 500, None))
            .with("https://recursos.example.org/2", sample_pdf(1, 500, None))
            .with("https://recursos.example.org/3", sample_pdf(1, 500, None));
        let renderer = ChromeRenderer::new(
            &RenderConfig {
                chrome_path: Some("/nonexistent/chrome".into()),
                ..ctx.render.clone()
            },
            "coursepack-test",
        );
        let store = FsArtifactStore::create(&ctx.cache_dir).unwrap();
        let materializer = Materializer::new(&ctx, &fetcher, &renderer, &store);

        let pdf_only = run_batch(&materializer, &manifest, 0, 1, &SilentProgress).await.unwrap();
        assert_eq!(pdf_only.materialized, 1);
        assert!(pdf_only.failed.is_empty());
        assert!(store.recorded_ordering().unwrap().is_some());

        let rest = run_batch(&materializer, &manifest, 1, 10, &SilentProgress).await.unwrap();
        assert_eq!(rest.materialized, 2);
        let reasons: Vec<(usize, &str)> = rest.failed.iter().map(|f| (f.position, f.reason)).collect();
        assert_eq!(reasons, vec![(1, "render_failed")]);
        assert!(store.find(&CacheKey::new(1, &manifest.resources()[1].url)).is_none());
    }

    #[tokio::test]
    async fn start_past_end_is_an_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "fisica");
        let manifest = two_unit_manifest(KINDS);
        let fetcher = fetcher();
        let renderer = FakeRenderer::default();
        let store = FsArtifactStore::create(&ctx.cache_dir).unwrap();

        let summary = run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &manifest, 40, 10, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.processed(), 0);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn reordered_manifest_aborts_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "fisica");
        let manifest = two_unit_manifest(KINDS);
        let fetcher = fetcher();
        let renderer = FakeRenderer::default();
        let store = FsArtifactStore::create(&ctx.cache_dir).unwrap();
        run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &manifest, 0, 1, &SilentProgress)
            .await
            .unwrap();

        let mut units: Vec<_> = manifest.units().cloned().collect();
        units.reverse();
        let reordered = Manifest::from_units("fisica", units);

        let err = run_batch(&Materializer::new(&ctx, &fetcher, &renderer, &store), &reordered, 0, 10, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, CoursepackError::OrderingMismatch { .. }));
        assert_eq!(fetcher.calls(), 1);
    }
}
