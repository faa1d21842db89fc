//! Engine error types.

use driftmark_state::StateError;
use driftmark_warehouse::WarehouseError;

/// Errors surfaced by a pipeline run.
///
/// Store errors abort the run with the step-scoped transaction rolled
/// back; the watermark stays at its last successfully-advanced value,
/// so a rerun neither skips nor duplicates data.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Control store failure.
    #[error("control store error: {0}")]
    State(#[from] StateError),

    /// Warehouse failure, including merge constraint faults.
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// The pipeline configuration is unusable.
    #[error("invalid pipeline config: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether this error indicates a fault in the merge decision
    /// rather than an environmental failure.
    #[must_use]
    pub fn is_merge_fault(&self) -> bool {
        matches!(
            self,
            Self::Warehouse(WarehouseError::Constraint { .. })
        )
    }
}
