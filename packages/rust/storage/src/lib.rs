//! Position-addressed artifact cache.
//!
//! Every resource of a subject owns one cache entry identified by its
//! canonical position plus a truncated SHA-256 of its URL
//! (`<index:03>_<hash10>`). An entry holds exactly one artifact file,
//! `output.pdf` or `direct.pdf`; the presence of either one marks the
//! resource as done, which is what lets a batch resume without redoing work.
//!
//! **Access rules:**
//! - one logical worker per position; claiming an entry is plain directory
//!   creation with no lock, so concurrent runs must own disjoint ranges
//! - artifacts are written atomically; a failed resource leaves no entry

mod fs;
mod memory;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use coursepack_shared::{CoursepackError, ManifestFingerprint, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

/// Artifact name for rendered or derived content.
pub const OUTPUT_FILE: &str = "output.pdf";

/// Artifact name for passthrough content.
pub const DIRECT_FILE: &str = "direct.pdf";

/// Name of the ordering ledger stored at the subject root.
pub const ORDERING_FILE: &str = "ordering.json";

/// Hex characters kept from the URL digest.
const SHORT_HASH_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Keys and artifacts
// ---------------------------------------------------------------------------

/// Provenance of a cached artifact, encoded in its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Produced by rendering (`output.pdf`).
    Rendered,
    /// Downloaded as-is (`direct.pdf`).
    Direct,
}

impl ArtifactKind {
    /// File name that stores this kind of artifact.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Rendered => OUTPUT_FILE,
            Self::Direct => DIRECT_FILE,
        }
    }
}

/// Cache identity of one resource: `(position, short_hash(url))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub position: usize,
    pub hash: String,
}

impl CacheKey {
    pub fn new(position: usize, url: &str) -> Self {
        Self {
            position,
            hash: short_hash(url),
        }
    }

    /// Directory name of the entry, e.g. `007_3fa2c41b9e`.
    pub fn dir_name(&self) -> String {
        format!("{:03}_{}", self.position, self.hash)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// First ten hex characters of SHA-256(url).
pub fn short_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// An artifact read back from the cache.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

/// The ordering ledger: which manifest order the cache positions refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingRecord {
    pub fingerprint: ManifestFingerprint,
    pub resource_count: usize,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Repository interface over the cache so pipeline logic never touches
/// paths directly.
pub trait ArtifactStore {
    /// Kind of the completed artifact at `key`, if any. `output.pdf` wins
    /// when both files exist.
    fn find(&self, key: &CacheKey) -> Option<ArtifactKind>;

    /// Start work on `key`: drop any stale entry, create it empty, and return
    /// a scratch directory the materializer may fill freely.
    fn claim(&self, key: &CacheKey) -> Result<PathBuf>;

    /// Atomically store the artifact bytes for `key`.
    fn write_artifact(&self, key: &CacheKey, kind: ArtifactKind, bytes: &[u8]) -> Result<()>;

    /// Atomically store the file at `source` as the artifact for `key`.
    fn persist_artifact(&self, key: &CacheKey, kind: ArtifactKind, source: &Path) -> Result<()> {
        let bytes = std::fs::read(source).map_err(|e| CoursepackError::io(source, e))?;
        self.write_artifact(key, kind, &bytes)
    }

    /// Read the completed artifact at `key`.
    fn read_artifact(&self, key: &CacheKey) -> Result<Option<Artifact>>;

    /// Remove the scratch area after the artifact is in place.
    fn release_scratch(&self, key: &CacheKey) -> Result<()>;

    /// Remove everything stored for `key`, leaving no trace of a failed attempt.
    fn abandon(&self, key: &CacheKey) -> Result<()>;

    /// The ordering recorded when the cache was first populated.
    fn recorded_ordering(&self) -> Result<Option<OrderingRecord>>;

    /// Record the ordering the cache positions refer to.
    fn record_ordering(&self, fingerprint: &ManifestFingerprint, resource_count: usize) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let url = "https://recursos.example.org/docs/fichas-u1.pdf";
        let a = CacheKey::new(7, url);
        let b = CacheKey::new(7, url);
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), 10);
        assert!(a.hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.dir_name(), format!("007_{}", a.hash));
    }

    #[test]
    fn short_hash_matches_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(short_hash("abc"), "ba7816bf8f");
    }

    #[test]
    fn position_and_url_both_disambiguate() {
        let url = "https://example.org/a";
        assert_ne!(CacheKey::new(1, url).dir_name(), CacheKey::new(2, url).dir_name());
        assert_ne!(
            CacheKey::new(1, url).dir_name(),
            CacheKey::new(1, "https://example.org/b").dir_name()
        );
    }

    #[test]
    fn wide_positions_are_not_truncated() {
        let key = CacheKey::new(1234, "u");
        assert!(key.dir_name().starts_with("1234_"));
    }

    #[test]
    fn artifact_kind_file_names() {
        assert_eq!(ArtifactKind::Rendered.file_name(), "output.pdf");
        assert_eq!(ArtifactKind::Direct.file_name(), "direct.pdf");
    }
}
