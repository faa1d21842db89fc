//! Control store trait definition.
//!
//! [`ControlStore`] defines the storage contract for the watermark log
//! and run history. Model types live in [`driftmark_types`].

use chrono::{DateTime, Utc};
use driftmark_types::run::{PipelineId, RunRecord, RunStats, RunStatus};
use driftmark_types::watermark::{Watermark, WatermarkEntry};

use crate::error;

/// Storage contract for pipeline control state.
///
/// The watermark log is append-only: entries are never updated in
/// place, and reads return the most recent entry. Implementations must
/// be `Send + Sync` for use behind `Arc<dyn ControlStore>`.
pub trait ControlStore: Send + Sync {
    /// Read the most recent watermark entry for a pipeline.
    ///
    /// Returns `Ok(None)` when no watermark has been appended yet —
    /// the normal initial state, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn latest_watermark(&self, pipeline: &PipelineId) -> error::Result<Option<WatermarkEntry>>;

    /// Append a new watermark entry for a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn append_watermark(
        &self,
        pipeline: &PipelineId,
        watermark: &Watermark,
        updated_at: DateTime<Utc>,
    ) -> error::Result<()>;

    /// Read up to `limit` watermark entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn watermark_history(
        &self,
        pipeline: &PipelineId,
        limit: u32,
    ) -> error::Result<Vec<WatermarkEntry>>;

    /// Begin a new pipeline run, returning its unique id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64>;

    /// Finalize a run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats)
        -> error::Result<()>;

    /// Read up to `limit` runs for a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn recent_runs(&self, pipeline: &PipelineId, limit: u32) -> error::Result<Vec<RunRecord>>;
}
