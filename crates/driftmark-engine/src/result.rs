//! Pipeline run result types.

use driftmark_types::run::PipelineId;
use driftmark_types::table::LoadMode;
use driftmark_types::watermark::Watermark;

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub pipeline: PipelineId,
    pub mode: LoadMode,
    /// Rows pulled from the source into staging.
    pub rows_extracted: u64,
    /// Rows merged (upsert) or versions opened (SCD2).
    pub rows_published: u64,
    /// The watermark persisted by this run, when it advanced.
    pub watermark: Option<Watermark>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Whether the run found nothing new to do.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        self.rows_extracted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_detection() {
        let summary = RunSummary {
            run_id: 1,
            pipeline: PipelineId::new("p"),
            mode: LoadMode::Upsert,
            rows_extracted: 0,
            rows_published: 0,
            watermark: None,
            duration_secs: 0.01,
        };
        assert!(summary.is_no_op());
    }
}
