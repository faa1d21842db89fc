//! Warehouse data-plane access for Driftmark pipelines.
//!
//! Provides the [`Warehouse`] trait and SQLite / `PostgreSQL`
//! implementations covering source reads bounded by a watermark,
//! staging truncate-and-reload, upsert merges, and SCD2 dimension
//! maintenance.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
mod sql;
pub mod sqlite;

pub use backend::Warehouse;
pub use error::WarehouseError;
pub use postgres::PostgresWarehouse;
pub use sqlite::SqliteWarehouse;
