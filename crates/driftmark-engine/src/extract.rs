//! Checkpoint-driven incremental extraction.
//!
//! Pulls source rows newer than the last persisted watermark into
//! staging and computes the advanced watermark. Persisting the advance
//! is the runner's job, after the merge step has confirmed the batch.

use driftmark_state::ControlStore;
use driftmark_types::record::ChangeRecord;
use driftmark_types::run::PipelineId;
use driftmark_types::table::TableSpec;
use driftmark_types::watermark::Watermark;
use driftmark_warehouse::Warehouse;

use crate::errors::PipelineError;

/// Result of one extraction: the staged rows and the watermark they
/// advance to.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    /// Rows loaded into staging, in `(modified, key)` order.
    pub rows: Vec<ChangeRecord>,
    /// Previous watermark folded with every extracted row. Never
    /// regresses; equals the previous watermark when `rows` is empty.
    pub watermark: Watermark,
    /// The watermark the extraction started from, if any.
    pub previous: Option<Watermark>,
}

impl ExtractOutcome {
    /// Whether the watermark moved and should be persisted.
    #[must_use]
    pub fn watermark_advanced(&self) -> bool {
        match &self.previous {
            Some(previous) => self.watermark != *previous,
            None => !self.rows.is_empty(),
        }
    }
}

/// Extract rows newer than the pipeline's checkpoint into staging.
///
/// A missing checkpoint is the normal first-run state and selects the
/// whole source. An empty selection leaves staging empty and the
/// watermark unchanged; neither is an error.
///
/// # Errors
///
/// Returns [`PipelineError`] if the control store or warehouse fails.
pub fn extract(
    warehouse: &dyn Warehouse,
    control: &dyn ControlStore,
    pipeline: &PipelineId,
    spec: &TableSpec,
) -> Result<ExtractOutcome, PipelineError> {
    let previous = control
        .latest_watermark(pipeline)?
        .map(|entry| entry.watermark);

    let rows = warehouse.fetch_changed(spec, previous.as_ref())?;
    tracing::info!(
        pipeline = pipeline.as_str(),
        source = %spec.source,
        rows = rows.len(),
        full_load = previous.is_none(),
        "Extracted source rows into staging"
    );

    warehouse.replace_staging(spec, &rows)?;

    let mut watermark = previous.unwrap_or_else(Watermark::initial);
    for row in &rows {
        watermark.observe(row.created_at, row.modified_at);
    }

    Ok(ExtractOutcome {
        rows,
        watermark,
        previous,
    })
}
