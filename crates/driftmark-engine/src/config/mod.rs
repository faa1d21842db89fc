//! Pipeline configuration: types, YAML parsing, validation.

pub mod parser;
pub mod validator;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use driftmark_types::table::{LoadMode, TableSpec};

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-backed `SQLite` database.
    Sqlite { path: PathBuf },
    /// `PostgreSQL` via a libpq-style connection string.
    Postgres { url: String },
}

/// One pipeline declaration, parsed from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, keys the watermark log and run history.
    pub pipeline: String,
    pub mode: LoadMode,
    /// Control store holding the watermark log and run history.
    pub control: StoreConfig,
    /// Warehouse holding source, staging, and target relations.
    pub warehouse: StoreConfig,
    pub table: TableSpec,
}
