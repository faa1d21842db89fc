//! Warehouse trait definition.
//!
//! [`Warehouse`] defines the data-plane contract: bounded source
//! reads, staging refresh, and the two merge targets. Model types live
//! in [`driftmark_types`].

use std::collections::HashMap;

use driftmark_types::record::ChangeRecord;
use driftmark_types::scd2::{DimensionVersion, VersionAction};
use driftmark_types::table::{LoadMode, TableSpec};
use driftmark_types::watermark::Watermark;

use crate::error;

/// Storage contract for one pipeline's relations.
///
/// Every mutating operation runs in its own transaction: a failure
/// rolls back the step in progress and leaves earlier steps applied.
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn Warehouse>`.
pub trait Warehouse: Send + Sync {
    /// Create the declared relations if they do not exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or invalid identifiers.
    fn ensure_tables(&self, spec: &TableSpec, mode: LoadMode) -> error::Result<()>;

    /// Read source rows newer than the watermark, ordered by
    /// `(modified, key)`.
    ///
    /// `None` means no checkpoint exists yet and selects every row.
    /// An empty result is normal, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or malformed rows.
    fn fetch_changed(
        &self,
        spec: &TableSpec,
        since: Option<&Watermark>,
    ) -> error::Result<Vec<ChangeRecord>>;

    /// Truncate staging and load `rows`, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure.
    fn replace_staging(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<()>;

    /// Read the staging relation back, ordered by `(modified, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or malformed rows.
    fn staging_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>>;

    /// Merge rows into the upsert target: insert new keys, overwrite
    /// the non-key columns of existing ones. Returns the rows merged.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure; [`WarehouseError::Constraint`](crate::WarehouseError)
    /// if the merge hits an unexpected constraint.
    fn upsert(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<u64>;

    /// Read the upsert target back, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or malformed rows.
    fn target_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>>;

    /// Read the open dimension version for each of `keys`.
    ///
    /// Keys with no open version are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Data`](crate::WarehouseError) if a key
    /// has more than one open version.
    fn open_versions(
        &self,
        spec: &TableSpec,
        keys: &[String],
    ) -> error::Result<HashMap<String, DimensionVersion>>;

    /// Apply planned version actions in one transaction. Returns the
    /// number of versions opened.
    ///
    /// Closed rows are never touched: a close that matches no open row
    /// fails the batch with
    /// [`WarehouseError::Constraint`](crate::WarehouseError).
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or a constraint fault.
    fn apply_version_actions(
        &self,
        spec: &TableSpec,
        actions: &[VersionAction],
    ) -> error::Result<u64>;

    /// Read the full dimension history, ordered by `(key, version_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`](crate::WarehouseError) on storage
    /// failure or malformed rows.
    fn dimension_rows(&self, spec: &TableSpec) -> error::Result<Vec<DimensionVersion>>;
}
