//! Coverage verification of the merged document against its manifest.
//!
//! Checks are independent: each reads the same [`DocumentView`] and yields a
//! [`CheckResult`]. A failing check never stops the others, and a failed
//! check is a finding, not an error.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use coursepack_shared::{CoursepackError, Manifest, PipelineContext, Result};
use lopdf::Document;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::document::{self, Bookmark};

/// Minimum coverage, in percent, for `resource_coverage` to pass.
pub const COVERAGE_THRESHOLD: f64 = 90.0;

/// Minimum mean non-whitespace characters per sampled page.
pub const TEXT_DENSITY_THRESHOLD: f64 = 150.0;

/// Pages sampled for `text_density`.
pub const TEXT_SAMPLE_PAGES: usize = 10;

// ---------------------------------------------------------------------------
// DocumentView
// ---------------------------------------------------------------------------

/// What the checks need to know about a merged document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentView {
    pub page_count: usize,
    /// The outline, or why it could not be read.
    pub outline: std::result::Result<Vec<Bookmark>, String>,
    /// Non-whitespace character counts for the sampled pages; `None` where
    /// extraction failed.
    pub text_sample: Vec<Option<usize>>,
}

impl DocumentView {
    /// Open `path`. A missing or unparsable document is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CoursepackError::setup(format!(
                "merged document not found at {}; run assemble first",
                path.display()
            )));
        }
        let document = document::open(path)?;
        Ok(Self::from_document(&document))
    }

    pub fn from_document(document: &Document) -> Self {
        let page_count = document.get_pages().len();
        let outline = document::read_outline(document).map_err(|e| e.to_string());
        let sample = sample_pages(page_count, TEXT_SAMPLE_PAGES);
        let text_sample = document::text_lengths(document, &sample).into_values().collect();
        Self {
            page_count,
            outline,
            text_sample,
        }
    }
}

/// Up to `max` evenly spaced 0-based page indices, always including the first.
pub fn sample_pages(page_count: usize, max: usize) -> Vec<usize> {
    if page_count == 0 || max == 0 {
        return Vec::new();
    }
    if page_count <= max {
        return (0..page_count).collect();
    }
    (0..max).map(|i| i * page_count / max).collect()
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    #[serde(skip)]
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    pub message: String,
    #[serde(flatten)]
    pub metrics: BTreeMap<&'static str, Value>,
}

impl CheckResult {
    fn new(name: &'static str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name,
            passed,
            skipped: false,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    fn skipped(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::new(name, true, message)
        }
    }

    fn metric(mut self, key: &'static str, value: Value) -> Self {
        self.metrics.insert(key, value);
        self
    }
}

/// More than one page.
pub fn check_page_count(view: &DocumentView) -> CheckResult {
    let passed = view.page_count > 1;
    CheckResult::new(
        "page_count",
        passed,
        format!("Document has {} pages", view.page_count),
    )
    .metric("total_pages", json!(view.page_count))
}

/// At least one top-level bookmark per manifest unit.
pub fn check_bookmarks(view: &DocumentView, manifest: &Manifest) -> CheckResult {
    let expected = manifest.unit_count();
    match &view.outline {
        Ok(outline) => {
            let found = outline.len();
            CheckResult::new(
                "bookmarks",
                found >= expected,
                format!("Found {found} top-level bookmarks for {expected} units"),
            )
            .metric("bookmarks_found", json!(found))
        }
        Err(e) => CheckResult::new("bookmarks", false, format!("Could not read bookmarks: {e}"))
            .metric("bookmarks_found", json!(0)),
    }
}

/// Mean extracted text per sampled page. Reported as skipped when no
/// sampled page yields any text, as with image-only documents.
pub fn check_text_density(view: &DocumentView) -> CheckResult {
    let lengths: Vec<usize> = view.text_sample.iter().flatten().copied().collect();
    if lengths.iter().all(|&n| n == 0) {
        return CheckResult::skipped("text_density", "No extractable text in sampled pages");
    }

    let average = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    CheckResult::new(
        "text_density",
        average >= TEXT_DENSITY_THRESHOLD,
        format!(
            "Average {average:.1} characters per page over {} sampled pages",
            lengths.len()
        ),
    )
    .metric("avg_chars_per_page", json!(round2(average)))
}

/// Share of manifest resources with a second-level bookmark.
pub fn check_resource_coverage(view: &DocumentView, manifest: &Manifest) -> CheckResult {
    let total = manifest.resource_count();
    match &view.outline {
        Ok(outline) => {
            let found: usize = outline.iter().map(|unit| unit.children.len()).sum();
            let percentage = coverage_percentage(found, total);
            CheckResult::new(
                "resource_coverage",
                percentage >= COVERAGE_THRESHOLD,
                format!("Coverage: {percentage:.1}% ({found}/{total} resources)"),
            )
            .metric("bookmarks_found", json!(found))
            .metric("total_resources", json!(total))
            .metric("coverage_percentage", json!(round2(percentage)))
        }
        Err(e) => CheckResult::new(
            "resource_coverage",
            false,
            format!("Could not read bookmarks: {e}"),
        )
        .metric("bookmarks_found", json!(0))
        .metric("total_resources", json!(total))
        .metric("coverage_percentage", json!(0.0)),
    }
}

/// `found / total * 100`, or 0 when there is nothing to cover.
pub fn coverage_percentage(found: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    found as f64 * 100.0 / total as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// QaReport
// ---------------------------------------------------------------------------

/// Verification report for one subject.
#[derive(Debug, Clone, Serialize)]
pub struct QaReport {
    pub subject: String,
    pub pdf_file: String,
    pub generated_at: DateTime<Utc>,
    #[serde(serialize_with = "checks_in_order")]
    pub checks: Vec<CheckResult>,
}

impl QaReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Checks as a JSON object keyed by name, in execution order.
fn checks_in_order<S: Serializer>(checks: &[CheckResult], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(checks.len()))?;
    for check in checks {
        map.serialize_entry(check.name, check)?;
    }
    map.end()
}

/// Run every check against `view`.
pub fn run_checks(view: &DocumentView, manifest: &Manifest) -> Vec<CheckResult> {
    vec![
        check_page_count(view),
        check_bookmarks(view, manifest),
        check_text_density(view),
        check_resource_coverage(view, manifest),
    ]
}

/// Verify the subject's merged document and build its report.
#[instrument(skip_all, fields(subject = %ctx.subject))]
pub fn verify(ctx: &PipelineContext, manifest: &Manifest) -> Result<QaReport> {
    let view = DocumentView::load(&ctx.merged_document_path)?;
    if let Err(e) = &view.outline {
        warn!(error = %e, "outline unreadable");
    }

    let checks = run_checks(&view, manifest);
    for check in &checks {
        info!(
            check = check.name,
            passed = check.passed,
            skipped = check.skipped,
            message = %check.message,
            "check finished"
        );
    }

    Ok(QaReport {
        subject: ctx.subject.clone(),
        pdf_file: ctx.merged_document_path.display().to_string(),
        generated_at: Utc::now(),
        checks,
    })
}
