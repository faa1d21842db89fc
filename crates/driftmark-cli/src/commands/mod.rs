//! CLI subcommands.

pub mod init;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use driftmark_engine::config::StoreConfig;
use driftmark_state::{ControlStore, PostgresControlStore, SqliteControlStore};
use driftmark_warehouse::{PostgresWarehouse, SqliteWarehouse, Warehouse};

/// Open the control store declared by the pipeline config.
pub fn open_control(config: &StoreConfig) -> Result<Box<dyn ControlStore>> {
    match config {
        StoreConfig::Sqlite { path } => {
            let store = SqliteControlStore::open(path)
                .with_context(|| format!("Failed to open control store: {}", path.display()))?;
            Ok(Box::new(store))
        }
        StoreConfig::Postgres { url } => {
            let store = PostgresControlStore::open(url)
                .context("Failed to connect to Postgres control store")?;
            Ok(Box::new(store))
        }
    }
}

/// Open the warehouse declared by the pipeline config.
pub fn open_warehouse(config: &StoreConfig) -> Result<Box<dyn Warehouse>> {
    match config {
        StoreConfig::Sqlite { path } => {
            let warehouse = SqliteWarehouse::open(path)
                .with_context(|| format!("Failed to open warehouse: {}", path.display()))?;
            Ok(Box::new(warehouse))
        }
        StoreConfig::Postgres { url } => {
            let warehouse =
                PostgresWarehouse::open(url).context("Failed to connect to Postgres warehouse")?;
            Ok(Box::new(warehouse))
        }
    }
}
