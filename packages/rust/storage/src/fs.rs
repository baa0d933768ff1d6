//! Filesystem-backed cache: `<temp-root>/<subject>/<index>_<hash10>/{output.pdf|direct.pdf}`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use coursepack_shared::{CoursepackError, ManifestFingerprint, Result};
use tracing::{debug, warn};

use crate::{
    Artifact, ArtifactKind, ArtifactStore, CacheKey, ORDERING_FILE, OrderingRecord,
};

/// Scratch area inside an entry (archive extraction, print copies).
const SCRATCH_DIR: &str = "unzipped";

/// Cache rooted at one subject's directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open the cache for writing, creating the subject directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| CoursepackError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Open an existing cache; a missing directory means there is nothing to assemble.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CoursepackError::setup(format!(
                "cache directory not found at {}; run materialize first",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Subject directory holding all entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a single entry.
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    fn scratch_dir(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(SCRATCH_DIR)
    }

    fn artifact_path(&self, key: &CacheKey, kind: ArtifactKind) -> PathBuf {
        self.entry_dir(key).join(kind.file_name())
    }

    fn temp_path(&self, key: &CacheKey, kind: ArtifactKind) -> PathBuf {
        self.entry_dir(key).join(format!(".{}.tmp", kind.file_name()))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn find(&self, key: &CacheKey) -> Option<ArtifactKind> {
        [ArtifactKind::Rendered, ArtifactKind::Direct]
            .into_iter()
            .find(|kind| self.artifact_path(key, *kind).is_file())
    }

    fn claim(&self, key: &CacheKey) -> Result<PathBuf> {
        let entry = self.entry_dir(key);
        if entry.exists() {
            debug!(entry = %entry.display(), "removing stale cache entry");
            std::fs::remove_dir_all(&entry).map_err(|e| CoursepackError::io(&entry, e))?;
        }

        let scratch = self.scratch_dir(key);
        std::fs::create_dir_all(&scratch).map_err(|e| CoursepackError::io(&scratch, e))?;
        Ok(scratch)
    }

    fn write_artifact(&self, key: &CacheKey, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        let entry = self.entry_dir(key);
        std::fs::create_dir_all(&entry).map_err(|e| CoursepackError::io(&entry, e))?;

        let temp = self.temp_path(key, kind);
        let target = self.artifact_path(key, kind);

        std::fs::write(&temp, bytes).map_err(|e| CoursepackError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| CoursepackError::io(&target, e))?;

        debug!(path = %target.display(), size = bytes.len(), "wrote artifact");
        Ok(())
    }

    fn persist_artifact(&self, key: &CacheKey, kind: ArtifactKind, source: &Path) -> Result<()> {
        let target = self.artifact_path(key, kind);
        match std::fs::rename(source, &target) {
            Ok(()) => {
                debug!(path = %target.display(), "moved artifact into place");
                Ok(())
            }
            Err(e) => {
                // Different filesystem: fall back to copy-through-temp.
                debug!(error = %e, "rename failed, copying artifact");
                let bytes = std::fs::read(source).map_err(|e| CoursepackError::io(source, e))?;
                self.write_artifact(key, kind, &bytes)
            }
        }
    }

    fn read_artifact(&self, key: &CacheKey) -> Result<Option<Artifact>> {
        let Some(kind) = self.find(key) else {
            return Ok(None);
        };
        let path = self.artifact_path(key, kind);
        let bytes = std::fs::read(&path).map_err(|e| CoursepackError::io(&path, e))?;
        Ok(Some(Artifact { kind, bytes }))
    }

    fn release_scratch(&self, key: &CacheKey) -> Result<()> {
        let scratch = self.scratch_dir(key);
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch).map_err(|e| CoursepackError::io(&scratch, e))?;
        }
        Ok(())
    }

    fn abandon(&self, key: &CacheKey) -> Result<()> {
        let entry = self.entry_dir(key);
        if entry.exists() {
            std::fs::remove_dir_all(&entry).map_err(|e| CoursepackError::io(&entry, e))?;
            debug!(entry = %entry.display(), "abandoned cache entry");
        }
        Ok(())
    }

    fn recorded_ordering(&self) -> Result<Option<OrderingRecord>> {
        let path = self.root.join(ORDERING_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| CoursepackError::io(&path, e))?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable ordering ledger");
                Err(CoursepackError::validation(format!(
                    "invalid {}: {e}",
                    path.display()
                )))
            }
        }
    }

    fn record_ordering(&self, fingerprint: &ManifestFingerprint, resource_count: usize) -> Result<()> {
        let record = OrderingRecord {
            fingerprint: fingerprint.clone(),
            resource_count,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| {
            CoursepackError::validation(format!("JSON serialization failed: {e}"))
        })?;

        let path = self.root.join(ORDERING_FILE);
        let temp = self.root.join(format!(".{ORDERING_FILE}.tmp"));
        std::fs::write(&temp, json).map_err(|e| CoursepackError::io(&temp, e))?;
        std::fs::rename(&temp, &path).map_err(|e| CoursepackError::io(&path, e))?;
        debug!(path = %path.display(), "recorded manifest ordering");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::create(dir.path().join("fisica")).expect("create");
        (dir, store)
    }

    #[test]
    fn open_requires_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = FsArtifactStore::open(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CoursepackError::Setup { .. }));
    }

    #[test]
    fn claim_write_find_read() {
        let (_dir, store) = store();
        let key = CacheKey::new(0, "https://example.org/a.pdf");

        assert_eq!(store.find(&key), None);
        let scratch = store.claim(&key).expect("claim");
        assert!(scratch.is_dir());
        assert_eq!(store.find(&key), None, "an empty claim is not a completed entry");

        store
            .write_artifact(&key, ArtifactKind::Direct, b"%PDF-1.7 fake")
            .expect("write");
        assert_eq!(store.find(&key), Some(ArtifactKind::Direct));

        let artifact = store.read_artifact(&key).expect("read").expect("present");
        assert_eq!(artifact.kind, ArtifactKind::Direct);
        assert_eq!(artifact.bytes, b"%PDF-1.7 fake");

        let entry = store.entry_dir(&key);
        assert!(entry.join("direct.pdf").is_file());
        assert!(!entry.join(".direct.pdf.tmp").exists());
    }

    #[test]
    fn rendered_artifact_wins_over_direct() {
        let (_dir, store) = store();
        let key = CacheKey::new(3, "u");
        store.write_artifact(&key, ArtifactKind::Direct, b"d").expect("write");
        store.write_artifact(&key, ArtifactKind::Rendered, b"r").expect("write");
        assert_eq!(store.find(&key), Some(ArtifactKind::Rendered));
    }

    #[test]
    fn claim_discards_stale_partial_entry() {
        let (_dir, store) = store();
        let key = CacheKey::new(1, "u");
        let scratch = store.claim(&key).expect("claim");
        std::fs::write(scratch.join("leftover.html"), "<html>").expect("write leftover");

        let scratch = store.claim(&key).expect("reclaim");
        assert_eq!(std::fs::read_dir(&scratch).expect("read dir").count(), 0);
    }

    #[test]
    fn persist_moves_file_and_release_clears_scratch() {
        let (_dir, store) = store();
        let key = CacheKey::new(2, "u");
        let scratch = store.claim(&key).expect("claim");
        let rendered = scratch.join("render.pdf");
        std::fs::write(&rendered, b"%PDF-rendered").expect("write");

        store
            .persist_artifact(&key, ArtifactKind::Rendered, &rendered)
            .expect("persist");
        store.release_scratch(&key).expect("release");

        let entry = store.entry_dir(&key);
        let names: Vec<String> = std::fs::read_dir(&entry)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["output.pdf".to_string()]);
    }

    #[test]
    fn abandon_removes_entry() {
        let (_dir, store) = store();
        let key = CacheKey::new(4, "u");
        store.claim(&key).expect("claim");
        store.abandon(&key).expect("abandon");
        assert!(!store.entry_dir(&key).exists());
        store.abandon(&key).expect("abandon is idempotent");
    }

    #[test]
    fn ordering_ledger_roundtrip() {
        let (_dir, store) = store();
        assert_eq!(store.recorded_ordering().expect("read"), None);

        let fp = ManifestFingerprint("abc123".into());
        store.record_ordering(&fp, 12).expect("record");

        let record = store.recorded_ordering().expect("read").expect("present");
        assert_eq!(record.fingerprint, fp);
        assert_eq!(record.resource_count, 12);
    }

    #[test]
    fn survives_reopen() {
        let (dir, store) = store();
        let key = CacheKey::new(9, "https://example.org/x");
        store.write_artifact(&key, ArtifactKind::Rendered, b"bytes").expect("write");

        let reopened = FsArtifactStore::open(dir.path().join("fisica")).expect("open");
        assert_eq!(reopened.find(&CacheKey::new(9, "https://example.org/x")), Some(ArtifactKind::Rendered));
    }
}
