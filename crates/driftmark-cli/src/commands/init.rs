//! `driftmark init` — create control and warehouse tables.

use std::path::Path;

use anyhow::Result;
use driftmark_engine::config::{parser, validator};
use driftmark_warehouse::Warehouse;

use super::{open_control, open_warehouse};

pub fn execute(pipeline_path: &Path) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)?;
    validator::validate(&config)?;

    // Opening the control store runs its idempotent DDL.
    let _control = open_control(&config.control)?;
    let warehouse = open_warehouse(&config.warehouse)?;
    warehouse.ensure_tables(&config.table, config.mode)?;

    tracing::info!(
        pipeline = %config.pipeline,
        source = %config.table.source,
        target = %config.table.target,
        "Pipeline tables ready"
    );
    println!("initialized pipeline '{}'", config.pipeline);
    Ok(())
}
