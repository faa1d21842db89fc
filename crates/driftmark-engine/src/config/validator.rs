//! Pipeline configuration validation.

use driftmark_types::table::validate_identifier;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;

/// Reject configurations that would build broken SQL or collapse
/// relations onto each other.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] naming the offending field.
pub fn validate(config: &PipelineConfig) -> Result<(), PipelineError> {
    if config.pipeline.trim().is_empty() {
        return Err(PipelineError::Config("pipeline name is empty".into()));
    }

    let table = &config.table;
    for name in table.all_identifiers() {
        validate_identifier(name).map_err(PipelineError::Config)?;
    }

    if table.columns.is_empty() {
        return Err(PipelineError::Config(
            "table declares no tracked columns".into(),
        ));
    }

    for reserved in [&table.key_column, &table.created_column, &table.modified_column] {
        if table.columns.iter().any(|c| &c.name == reserved) {
            return Err(PipelineError::Config(format!(
                "column '{reserved}' is already used as a key or timestamp column"
            )));
        }
    }

    let relations = [&table.source, &table.staging, &table.target];
    for (i, a) in relations.iter().enumerate() {
        for b in &relations[i + 1..] {
            if a == b {
                return Err(PipelineError::Config(format!(
                    "relation '{a}' is declared twice; source, staging, and target must differ"
                )));
            }
        }
    }

    Ok(())
}
