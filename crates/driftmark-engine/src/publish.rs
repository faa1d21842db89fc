//! Upsert publication of a staging batch.

use driftmark_types::record::ChangeRecord;
use driftmark_types::table::TableSpec;
use driftmark_warehouse::Warehouse;

use crate::batch::dedup_latest;
use crate::errors::PipelineError;

/// Merge a staging batch into the latest-state target: new keys are
/// inserted, existing keys overwritten in place. Returns the number of
/// rows merged.
///
/// Keys absent from the batch are untouched; the publisher never
/// deletes. Applying the same batch twice leaves the target identical,
/// so a rerun after a failure between steps is safe.
///
/// # Errors
///
/// Returns [`PipelineError`] if the warehouse fails or the merge hits
/// an unexpected constraint.
pub fn publish(
    warehouse: &dyn Warehouse,
    spec: &TableSpec,
    rows: &[ChangeRecord],
) -> Result<u64, PipelineError> {
    let deduped = dedup_latest(rows);
    let merged = warehouse.upsert(spec, &deduped)?;
    tracing::info!(
        target_table = %spec.target,
        staged = rows.len(),
        merged,
        "Published staging batch to upsert target"
    );
    Ok(merged)
}
