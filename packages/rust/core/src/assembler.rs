//! Merged document assembler.
//!
//! Reads every cached artifact in canonical order, skips the ones that are
//! missing or unusable, lays the rest out with [`plan_layout`], and writes
//! one document with a unit → resource outline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use coursepack_shared::{Manifest, PipelineContext, Result};
use coursepack_storage::{ArtifactStore, CacheKey};
use lopdf::Document;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::document::{PdfMerger, load_pdf, save_atomic};
use crate::ordering::{OrderingState, check_ordering};
use crate::outline::{OutlineNode, plan_layout};

/// Why a position contributes no pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// No completed artifact in the cache.
    Missing,
    /// The artifact exists but is empty, unparsable, or has no pages.
    Corrupt(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Corrupt(_) => "corrupt",
        }
    }
}

/// A position left out of the merged document.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedResource {
    pub position: usize,
    pub unit: String,
    pub title: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Output from an assembly run.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    /// Where the merged document was written; `None` when nothing was usable.
    pub output: Option<PathBuf>,
    pub total_pages: usize,
    /// Positions that contributed pages.
    pub included: usize,
    pub skipped: Vec<SkippedResource>,
    pub outline: Vec<OutlineNode>,
    pub ordering: OrderingState,
}

/// Assemble the subject's merged document from the cache.
#[instrument(skip_all, fields(subject = %ctx.subject, resources = manifest.resource_count()))]
pub fn assemble<S: ArtifactStore>(
    ctx: &PipelineContext,
    manifest: &Manifest,
    store: &S,
) -> Result<AssembleResult> {
    let ordering = check_ordering(store, manifest)?;

    let (mut documents, skipped) = load_artifacts(manifest, store)?;
    let layout = plan_layout(manifest, |position| {
        documents.get(&position).map(|doc| doc.get_pages().len())
    });

    if layout.is_empty() {
        warn!("no usable artifacts; merged document not written");
        return Ok(AssembleResult {
            output: None,
            total_pages: 0,
            included: 0,
            skipped,
            outline: Vec::new(),
            ordering,
        });
    }

    let mut merger = PdfMerger::new();
    for part in &layout.parts {
        let Some(document) = documents.remove(&part.position) else {
            continue;
        };
        let added = merger.append(document)?;
        debug!(position = part.position, first_page = part.first_page, pages = added, "appended");
    }

    let mut merged = merger.finish(&layout.outline)?;
    save_atomic(&mut merged, &ctx.merged_document_path)?;

    info!(
        path = %ctx.merged_document_path.display(),
        pages = layout.total_pages,
        included = layout.parts.len(),
        skipped = skipped.len(),
        "merged document written"
    );

    Ok(AssembleResult {
        output: Some(ctx.merged_document_path.clone()),
        total_pages: layout.total_pages,
        included: layout.parts.len(),
        skipped,
        outline: layout.outline,
        ordering,
    })
}

/// Parse every artifact up front so a corrupt one is treated exactly like a
/// missing one when laying out pages.
fn load_artifacts<S: ArtifactStore>(
    manifest: &Manifest,
    store: &S,
) -> Result<(BTreeMap<usize, Document>, Vec<SkippedResource>)> {
    let mut documents = BTreeMap::new();
    let mut skipped = Vec::new();

    for (position, resource) in manifest.resources().iter().enumerate() {
        let key = CacheKey::new(position, &resource.url);
        let reason = match store.read_artifact(&key) {
            Ok(None) => SkipReason::Missing,
            Ok(Some(artifact)) => match load_pdf(&artifact.bytes) {
                Ok(document) => {
                    documents.insert(position, document);
                    continue;
                }
                Err(e) => SkipReason::Corrupt(e.to_string()),
            },
            Err(e) => SkipReason::Corrupt(e.to_string()),
        };

        warn!(
            position,
            title = %resource.text,
            reason = reason.as_str(),
            "skipping resource"
        );
        skipped.push(SkippedResource {
            position,
            unit: resource.unit.clone(),
            title: resource.text.clone(),
            reason,
        });
    }

    Ok((documents, skipped))
}
