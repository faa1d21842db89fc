//! Dimension version types for SCD2 targets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{AttrValue, ChangeRecord};

/// One historical version of a dimension row.
///
/// For any business key, at most one version is open (`end_at` is
/// `None`, `is_current` is true). Closed versions never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionVersion {
    /// Surrogate id assigned by the warehouse.
    pub version_id: i64,
    pub key: String,
    /// Tracked attribute values at this version.
    pub attributes: BTreeMap<String, AttrValue>,
    pub start_at: DateTime<Utc>,
    /// `None` while the version is the current one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    pub is_current: bool,
}

impl DimensionVersion {
    /// Whether this version is the open one for its key.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_current && self.end_at.is_none()
    }
}

/// A planned mutation of the dimension, produced by the versioner and
/// applied transactionally by the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VersionAction {
    /// Insert a first version for a key with no open row.
    Open {
        record: ChangeRecord,
        start_at: DateTime<Utc>,
    },
    /// Close the open version and insert its successor.
    CloseAndOpen {
        /// Surrogate id of the row being closed.
        version_id: i64,
        record: ChangeRecord,
        at: DateTime<Utc>,
    },
}
