//! `driftmark status` — show the checkpoint and recent runs.

use std::path::Path;

use anyhow::Result;
use driftmark_engine::config::parser;
use driftmark_state::ControlStore;
use driftmark_types::run::PipelineId;

use super::open_control;

pub fn execute(pipeline_path: &Path, limit: u32) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)?;
    let control = open_control(&config.control)?;
    let pipeline = PipelineId::new(config.pipeline.clone());

    match control.latest_watermark(&pipeline)? {
        Some(entry) => {
            println!(
                "watermark: created<={} modified<={} (updated {})",
                entry.watermark.max_created_at, entry.watermark.max_modified_at, entry.updated_at
            );
        }
        None => println!("watermark: none (pipeline has not run)"),
    }

    let runs = control.recent_runs(&pipeline, limit)?;
    if runs.is_empty() {
        println!("runs: none");
        return Ok(());
    }

    println!("runs (newest first):");
    for run in runs {
        let finished = run
            .finished_at
            .map_or_else(|| "-".to_string(), |ts| ts.to_string());
        let error = run
            .error_message
            .map_or_else(String::new, |msg| format!(" error: {msg}"));
        println!(
            "  #{} {} started {} finished {} extracted {} published {}{}",
            run.id,
            run.status,
            run.started_at,
            finished,
            run.rows_extracted,
            run.rows_published,
            error
        );
    }
    Ok(())
}
