//! Guards that keep cache positions tied to the manifest order they were
//! produced from.

use coursepack_shared::{CoursepackError, Manifest, Result};
use coursepack_storage::ArtifactStore;
use tracing::{debug, info, warn};

/// Outcome of comparing the manifest against the cache's ordering ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingState {
    /// The ledger matches the manifest.
    Matches,
    /// No ledger existed; one was written now.
    Recorded,
    /// No ledger exists and none was written.
    Unrecorded,
}

/// Before materializing: record the ordering on first use, fail on mismatch.
pub fn ensure_ordering<S: ArtifactStore>(store: &S, manifest: &Manifest) -> Result<OrderingState> {
    match compare(store, manifest)? {
        OrderingState::Unrecorded => {
            store.record_ordering(&manifest.fingerprint(), manifest.resource_count())?;
            info!(resources = manifest.resource_count(), "recorded manifest ordering");
            Ok(OrderingState::Recorded)
        }
        state => Ok(state),
    }
}

/// Before assembling: fail on mismatch, warn when the cache has no ledger.
pub fn check_ordering<S: ArtifactStore>(store: &S, manifest: &Manifest) -> Result<OrderingState> {
    let state = compare(store, manifest)?;
    if state == OrderingState::Unrecorded {
        warn!("cache has no ordering ledger; positions cannot be checked against the manifest");
    }
    Ok(state)
}

fn compare<S: ArtifactStore>(store: &S, manifest: &Manifest) -> Result<OrderingState> {
    let current = manifest.fingerprint();
    match store.recorded_ordering()? {
        None => Ok(OrderingState::Unrecorded),
        Some(record) if record.fingerprint == current => {
            debug!(fingerprint = %current, "manifest ordering matches cache");
            Ok(OrderingState::Matches)
        }
        Some(record) => Err(CoursepackError::OrderingMismatch {
            recorded: record.fingerprint.to_string(),
            current: current.to_string(),
        }),
    }
}
