//! How the heatmap pipeline reports mask and aggregation progress.
//!
//! One unit is one finished chunk: a run's mask of one band, or one band's
//! weighted sum. A job over `r` runs and `b` bands is `r * b + b` units.
//! The CLI shows them on an `indicatif` bar; tests pass [`NullProgress`].

use std::sync::Arc;

/// Sink for heatmap progress.
///
/// Mask and aggregation tasks finish on the blocking pool in any order and
/// report from there, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Number of chunks the job will finish.
    fn set_total(&self, total: u64);

    /// Chunks finished so far.
    fn set_position(&self, pos: u64);

    /// `delta` more chunks finished.
    fn inc(&self, delta: u64);

    /// Current stage, such as which bands are being masked.
    fn set_message(&self, msg: String);

    /// The output raster is written; `msg` names it.
    fn finish(&self, msg: String);

    /// The job failed; drop the indicator.
    fn finish_and_clear(&self);
}

/// Discards progress.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// A [`NullProgress`] for [`crate::pipeline::run_heatmap_sources`] callers
/// without a terminal.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
