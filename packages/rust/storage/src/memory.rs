//! In-memory cache backend for tests and dry runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use coursepack_shared::{CoursepackError, ManifestFingerprint, Result};

use crate::{Artifact, ArtifactKind, ArtifactStore, CacheKey, OrderingRecord};

/// Artifacts live in a map; scratch directories live in a private temp dir.
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<CacheKey, Artifact>>,
    ordering: Mutex<Option<OrderingRecord>>,
    scratch: tempfile::TempDir,
}

impl MemoryArtifactStore {
    pub fn new() -> Result<Self> {
        let scratch = tempfile::tempdir()
            .map_err(|e| CoursepackError::io(std::env::temp_dir(), e))?;
        Ok(Self {
            artifacts: Mutex::new(HashMap::new()),
            ordering: Mutex::new(None),
            scratch,
        })
    }

    /// Number of completed artifacts.
    pub fn len(&self) -> usize {
        self.lock_artifacts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scratch_dir(&self, key: &CacheKey) -> PathBuf {
        self.scratch.path().join(key.dir_name())
    }

    fn lock_artifacts(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Artifact>> {
        self.artifacts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn find(&self, key: &CacheKey) -> Option<ArtifactKind> {
        self.lock_artifacts().get(key).map(|a| a.kind)
    }

    fn claim(&self, key: &CacheKey) -> Result<PathBuf> {
        self.lock_artifacts().remove(key);
        let dir = self.scratch_dir(key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| CoursepackError::io(&dir, e))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| CoursepackError::io(&dir, e))?;
        Ok(dir)
    }

    fn write_artifact(&self, key: &CacheKey, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        let mut artifacts = self.lock_artifacts();
        // Rendered content takes precedence, mirroring the filesystem lookup order.
        if kind == ArtifactKind::Direct
            && artifacts.get(key).is_some_and(|a| a.kind == ArtifactKind::Rendered)
        {
            return Ok(());
        }
        artifacts.insert(
            key.clone(),
            Artifact {
                kind,
                bytes: bytes.to_vec(),
            },
        );
        Ok(())
    }

    fn read_artifact(&self, key: &CacheKey) -> Result<Option<Artifact>> {
        Ok(self.lock_artifacts().get(key).cloned())
    }

    fn release_scratch(&self, key: &CacheKey) -> Result<()> {
        let dir = self.scratch_dir(key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| CoursepackError::io(&dir, e))?;
        }
        Ok(())
    }

    fn abandon(&self, key: &CacheKey) -> Result<()> {
        self.lock_artifacts().remove(key);
        self.release_scratch(key)
    }

    fn recorded_ordering(&self) -> Result<Option<OrderingRecord>> {
        Ok(self
            .ordering
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn record_ordering(&self, fingerprint: &ManifestFingerprint, resource_count: usize) -> Result<()> {
        *self
            .ordering
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(OrderingRecord {
            fingerprint: fingerprint.clone(),
            resource_count,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_cache() {
        let store = MemoryArtifactStore::new().expect("store");
        let key = CacheKey::new(0, "https://example.org/a");

        let scratch = store.claim(&key).expect("claim");
        assert!(scratch.is_dir());
        assert!(store.is_empty());

        let file = scratch.join("render.pdf");
        std::fs::write(&file, b"rendered").expect("write");
        store
            .persist_artifact(&key, ArtifactKind::Rendered, &file)
            .expect("persist");
        store.release_scratch(&key).expect("release");

        assert!(!scratch.exists());
        assert_eq!(store.find(&key), Some(ArtifactKind::Rendered));
        assert_eq!(store.read_artifact(&key).expect("read").expect("some").bytes, b"rendered");

        store.abandon(&key).expect("abandon");
        assert_eq!(store.find(&key), None);
    }
}
