//! `driftmark run` — execute one pipeline run.

use std::path::Path;

use anyhow::Result;
use driftmark_engine::clock::SystemClock;
use driftmark_engine::config::parser;
use driftmark_engine::run_pipeline;

use super::{open_control, open_warehouse};

pub fn execute(pipeline_path: &Path) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)?;
    let control = open_control(&config.control)?;
    let warehouse = open_warehouse(&config.warehouse)?;

    let summary = run_pipeline(&config, warehouse.as_ref(), control.as_ref(), &SystemClock)?;

    println!(
        "{}: {} rows extracted, {} published in {:.3}s",
        summary.pipeline, summary.rows_extracted, summary.rows_published, summary.duration_secs
    );
    match summary.watermark {
        Some(wm) => println!(
            "watermark advanced to created<={} modified<={}",
            wm.max_created_at, wm.max_modified_at
        ),
        None => println!("watermark unchanged"),
    }
    Ok(())
}
