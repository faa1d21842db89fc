//! Change records flowing from source through staging to a target.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single attribute value as read from a source relation.
///
/// The variant set mirrors the declarable column types; backends map
/// these to their native storage classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl AttrValue {
    /// Human-readable variant name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }
}

/// One business-entity row scoped to a single pipeline run.
///
/// `attributes` carries exactly the declared tracked columns, keyed by
/// column name. The map is ordered so row comparison and SQL generation
/// are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Business key, normalized to text.
    pub key: String,
    /// Tracked attribute values by column name.
    pub attributes: BTreeMap<String, AttrValue>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Deterministic batch order: `(modified_at, key)` ascending.
    ///
    /// Used wherever a staging batch must be processed as a single
    /// linear sequence (dedup, version chaining).
    #[must_use]
    pub fn batch_order(a: &ChangeRecord, b: &ChangeRecord) -> std::cmp::Ordering {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.key.cmp(&b.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, s).unwrap()
    }

    fn record(key: &str, modified: DateTime<Utc>) -> ChangeRecord {
        ChangeRecord {
            key: key.to_string(),
            attributes: BTreeMap::new(),
            created_at: ts(0),
            modified_at: modified,
        }
    }

    #[test]
    fn attr_value_untagged_json() {
        let json = serde_json::to_string(&AttrValue::Integer(42)).unwrap();
        assert_eq!(json, "42");
        let json = serde_json::to_string(&AttrValue::Text("x".into())).unwrap();
        assert_eq!(json, "\"x\"");
        let json = serde_json::to_string(&AttrValue::Null).unwrap();
        assert_eq!(json, "null");

        let back: AttrValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(back, AttrValue::Real(3.5));
    }

    #[test]
    fn batch_order_sorts_by_modified_then_key() {
        let mut rows = vec![
            record("b", ts(5)),
            record("a", ts(5)),
            record("c", ts(1)),
        ];
        rows.sort_by(ChangeRecord::batch_order);
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[test]
    fn record_equality_includes_attributes() {
        let mut a = record("k", ts(1));
        let mut b = record("k", ts(1));
        a.attributes
            .insert("phone".into(), AttrValue::Text("555-0001".into()));
        b.attributes
            .insert("phone".into(), AttrValue::Text("555-0002".into()));
        assert_ne!(a, b);
    }
}
