//! Core domain types for coursepack resources.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// The kind of learning resource a manifest entry points at.
///
/// Materialization dispatches on this with an exhaustive `match`, so adding
/// a variant is a compile-time-visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A downloadable SCORM package (zip archive with an HTML entry point).
    ScormZip,
    /// A SCORM package served as a live HTML page.
    ScormHtml,
    /// A page hosted by the Agrega repository.
    AgregaHtml,
    /// A direct PDF download.
    Pdf,
    /// Anything else; normally filtered out before the manifest is written.
    Other,
}

impl ResourceType {
    /// The manifest spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScormZip => "scorm_zip",
            Self::ScormHtml => "scorm_html",
            Self::AgregaHtml => "agrega_html",
            Self::Pdf => "pdf",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A single learning resource listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Source URL; also the cache key material.
    pub url: String,
    /// Human-readable label, used as the bookmark title.
    pub text: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceType,
    /// Name of the unit this resource is grouped under.
    pub unit: String,
}

impl Resource {
    /// Build a resource (mostly useful in tests and fixtures).
    pub fn new(
        unit: impl Into<String>,
        text: impl Into<String>,
        url: impl Into<String>,
        kind: ResourceType,
    ) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
            kind,
            unit: unit.into(),
        }
    }
}
