//! Pipeline logic for coursepack: materialize resources into the cache,
//! assemble the merged document, and verify it against the manifest.

pub mod assembler;
pub mod batch;
pub mod document;
pub mod materializer;
pub mod ordering;
pub mod outline;
pub mod report;
pub mod scorm;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use assembler::{AssembleResult, SkipReason, SkippedResource, assemble};
pub use batch::{BatchSummary, FailedResource, ProgressReporter, SilentProgress, run_batch};
pub use materializer::{MaterializeOutcome, Materializer, ResourceFailure};
pub use ordering::OrderingState;
pub use outline::{Layout, OutlineNode, plan_layout};
pub use report::write_reports;
pub use verifier::{CheckResult, DocumentView, QaReport, verify};
