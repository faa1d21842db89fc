//! Pipeline run orchestration.
//!
//! One run is a strict sequence: extract into staging, merge per the
//! load mode, then advance the watermark. The watermark moves only
//! after the merge commits, so a failure anywhere leaves the last
//! checkpoint pointing at fully published data and the run is safe to
//! repeat.

use std::time::Instant;

use driftmark_state::ControlStore;
use driftmark_types::run::{PipelineId, RunStats, RunStatus};
use driftmark_types::table::LoadMode;
use driftmark_types::watermark::Watermark;
use driftmark_warehouse::Warehouse;

use crate::clock::Clock;
use crate::config::{validator, PipelineConfig};
use crate::errors::PipelineError;
use crate::result::RunSummary;
use crate::{extract, publish, scd2};

/// Execute one pipeline run end to end.
///
/// The run is recorded in the control store's run history: `running`
/// at start, then `completed` or `failed` with counts and the error
/// message.
///
/// # Errors
///
/// Returns [`PipelineError`] on a config, control store, or warehouse
/// failure. The checkpoint is left at its last successfully-advanced
/// value.
pub fn run_pipeline(
    config: &PipelineConfig,
    warehouse: &dyn Warehouse,
    control: &dyn ControlStore,
    clock: &dyn Clock,
) -> Result<RunSummary, PipelineError> {
    validator::validate(config)?;

    let pipeline = PipelineId::new(config.pipeline.clone());
    let started = Instant::now();
    let run_id = control.start_run(&pipeline)?;
    tracing::info!(
        pipeline = pipeline.as_str(),
        run_id,
        mode = config.mode.as_str(),
        "Starting pipeline run"
    );

    match execute(config, warehouse, control, clock, &pipeline) {
        Ok((rows_extracted, rows_published, watermark)) => {
            let stats = RunStats {
                rows_extracted,
                rows_published,
                error_message: None,
            };
            control.complete_run(run_id, RunStatus::Completed, &stats)?;
            let duration_secs = started.elapsed().as_secs_f64();
            tracing::info!(
                pipeline = pipeline.as_str(),
                run_id,
                rows_extracted,
                rows_published,
                duration_secs,
                "Pipeline run completed"
            );
            Ok(RunSummary {
                run_id,
                pipeline,
                mode: config.mode,
                rows_extracted,
                rows_published,
                watermark,
                duration_secs,
            })
        }
        Err(e) => {
            let stats = RunStats {
                rows_extracted: 0,
                rows_published: 0,
                error_message: Some(e.to_string()),
            };
            if let Err(record_err) = control.complete_run(run_id, RunStatus::Failed, &stats) {
                tracing::warn!(
                    pipeline = pipeline.as_str(),
                    run_id,
                    error = %record_err,
                    "Failed to record run failure"
                );
            }
            tracing::error!(
                pipeline = pipeline.as_str(),
                run_id,
                error = %e,
                "Pipeline run failed"
            );
            Err(e)
        }
    }
}

/// The fallible middle of a run: staging refresh, merge, watermark
/// advance.
fn execute(
    config: &PipelineConfig,
    warehouse: &dyn Warehouse,
    control: &dyn ControlStore,
    clock: &dyn Clock,
    pipeline: &PipelineId,
) -> Result<(u64, u64, Option<Watermark>), PipelineError> {
    warehouse.ensure_tables(&config.table, config.mode)?;

    let outcome = extract::extract(warehouse, control, pipeline, &config.table)?;
    let rows_extracted = outcome.rows.len() as u64;

    let rows_published = match config.mode {
        LoadMode::Upsert => publish::publish(warehouse, &config.table, &outcome.rows)?,
        LoadMode::Scd2 => scd2::version(warehouse, &config.table, &outcome.rows, clock.now())?,
    };

    let watermark = if outcome.watermark_advanced() {
        control.append_watermark(pipeline, &outcome.watermark, clock.now())?;
        tracing::info!(
            pipeline = pipeline.as_str(),
            max_created_at = %outcome.watermark.max_created_at,
            max_modified_at = %outcome.watermark.max_modified_at,
            "Watermark advanced"
        );
        Some(outcome.watermark)
    } else {
        None
    };

    Ok((rows_extracted, rows_published, watermark))
}
