//! Declared table shapes for a pipeline.
//!
//! A [`TableSpec`] names the source, staging, and target relations and
//! declares the key, timestamp, and tracked attribute columns. The
//! tracked set is explicit: change detection compares exactly these
//! columns, nothing else.

use serde::{Deserialize, Serialize};

/// How staging rows are merged into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// One row per key, updated in place.
    Upsert,
    /// History-preserving dimension: close the open version on change,
    /// insert a new one.
    Scd2,
}

impl LoadMode {
    /// Wire-format string for logs and storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Scd2 => "scd2",
        }
    }
}

/// Declared type of a tracked column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bigint,
    Real,
    Text,
    Timestamp,
}

/// One tracked attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

/// Declared shape of one pipeline's relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Source relation (read-only to the pipeline).
    pub source: String,
    /// Staging relation, truncate-and-reload each run.
    pub staging: String,
    /// Target relation: latest-state table or SCD2 dimension.
    pub target: String,
    pub key_column: String,
    pub created_column: String,
    pub modified_column: String,
    /// Tracked attribute columns, in declared order.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Names of the tracked attribute columns, in declared order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Every identifier this spec will interpolate into SQL.
    #[must_use]
    pub fn all_identifiers(&self) -> Vec<&str> {
        let mut names = vec![
            self.source.as_str(),
            self.staging.as_str(),
            self.target.as_str(),
            self.key_column.as_str(),
            self.created_column.as_str(),
            self.modified_column.as_str(),
        ];
        names.extend(self.columns.iter().map(|c| c.name.as_str()));
        names
    }
}

/// Validate an identifier destined for SQL interpolation.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes, the common
/// denominator of the supported backends.
///
/// # Errors
///
/// Returns a message naming the rejected identifier.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("identifier must not be empty".to_string());
    }

    if name.len() > 63 {
        return Err(format!(
            "identifier '{}' exceeds the maximum length of 63 bytes (got {})",
            name,
            name.len()
        ));
    }

    let mut chars = name.chars();
    let first = chars.next().expect("non-empty identifier");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(format!(
            "identifier '{name}' must start with a letter or underscore"
        ));
    }

    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(format!(
                "identifier '{name}' contains invalid character '{ch}'"
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec {
            source: "src_customers".into(),
            staging: "stg_customers".into(),
            target: "dim_customers".into(),
            key_column: "cust_id".into(),
            created_column: "created_at".into(),
            modified_column: "modified_at".into(),
            columns: vec![ColumnSpec {
                name: "phone_no".into(),
                data_type: DataType::Text,
            }],
        }
    }

    #[test]
    fn column_names_in_declared_order() {
        let mut s = spec();
        s.columns.push(ColumnSpec {
            name: "email".into(),
            data_type: DataType::Text,
        });
        assert_eq!(s.column_names(), ["phone_no", "email"]);
    }

    #[test]
    fn all_identifiers_covers_tables_and_columns() {
        let s = spec();
        let names = s.all_identifiers();
        for expected in [
            "src_customers",
            "stg_customers",
            "dim_customers",
            "cust_id",
            "created_at",
            "modified_at",
            "phone_no",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn validate_identifier_accepts_plain_names() {
        assert!(validate_identifier("src_customers").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("c0l").is_ok());
    }

    #[test]
    fn validate_identifier_rejects_bad_names() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1starts_with_digit").is_err());
        assert!(validate_identifier("has space").is_err());
        assert!(validate_identifier("quote\"inject").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn load_mode_serde() {
        assert_eq!(serde_json::to_string(&LoadMode::Upsert).unwrap(), "\"upsert\"");
        assert_eq!(serde_json::to_string(&LoadMode::Scd2).unwrap(), "\"scd2\"");
        let back: LoadMode = serde_json::from_str("\"scd2\"").unwrap();
        assert_eq!(back, LoadMode::Scd2);
    }

    #[test]
    fn column_spec_yaml_field_name() {
        let json = serde_json::to_value(&ColumnSpec {
            name: "phone_no".into(),
            data_type: DataType::Text,
        })
        .unwrap();
        assert_eq!(json.get("type").unwrap(), "text");
    }
}
