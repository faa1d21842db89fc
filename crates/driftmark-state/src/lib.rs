//! Control-plane persistence for Driftmark pipelines.
//!
//! Provides the [`ControlStore`] trait with SQLite and `PostgreSQL`
//! implementations for the append-only watermark log and run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use backend::ControlStore;
pub use error::StateError;
pub use postgres::PostgresControlStore;
pub use sqlite::SqliteControlStore;
