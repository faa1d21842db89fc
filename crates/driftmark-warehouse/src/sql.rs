//! SQL building helpers shared by the warehouse backends.
//!
//! Identifiers from a [`TableSpec`] are validated before any statement
//! is built, then double-quoted; the validated charset cannot contain a
//! quote. Statement text is identical across backends except for the
//! placeholder prefix (`?` for `SQLite`, `$` for `PostgreSQL`).

use std::fmt::Write as _;

use driftmark_types::table::{validate_identifier, TableSpec};

use crate::error::{self, WarehouseError};

/// Quote an already-validated identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Validate every identifier the table declaration will interpolate
/// into SQL.
pub(crate) fn validate_spec(spec: &TableSpec) -> error::Result<()> {
    for name in spec.all_identifiers() {
        validate_identifier(name).map_err(WarehouseError::Data)?;
    }
    Ok(())
}

/// Numbered placeholder list: `?1, ?2, ...` or `$1, $2, ...`.
pub(crate) fn placeholders(count: usize, prefix: char) -> String {
    let mut out = String::new();
    for i in 1..=count {
        if i > 1 {
            out.push_str(", ");
        }
        let _ = write!(out, "{prefix}{i}");
    }
    out
}

/// Quoted column list for a record row: key, tracked columns, created,
/// modified — in that order, matching the bind order everywhere.
pub(crate) fn record_columns(spec: &TableSpec) -> String {
    let mut cols = vec![quote_ident(&spec.key_column)];
    cols.extend(spec.columns.iter().map(|c| quote_ident(&c.name)));
    cols.push(quote_ident(&spec.created_column));
    cols.push(quote_ident(&spec.modified_column));
    cols.join(", ")
}

/// Number of bound values in a record row.
pub(crate) fn record_width(spec: &TableSpec) -> usize {
    spec.columns.len() + 3
}

/// `SELECT <record columns> FROM <table>` without predicate or order.
fn select_records(spec: &TableSpec, table: &str) -> String {
    format!("SELECT {} FROM {}", record_columns(spec), quote_ident(table))
}

/// Source read, optionally bounded by the watermark predicate
/// (`created > $1 OR modified > $2`), ordered by `(modified, key)`.
pub(crate) fn fetch_changed_sql(spec: &TableSpec, with_predicate: bool, prefix: char) -> String {
    let mut sql = select_records(spec, &spec.source);
    if with_predicate {
        let _ = write!(
            sql,
            " WHERE {} > {prefix}1 OR {} > {prefix}2",
            quote_ident(&spec.created_column),
            quote_ident(&spec.modified_column),
        );
    }
    let _ = write!(
        sql,
        " ORDER BY {}, {}",
        quote_ident(&spec.modified_column),
        quote_ident(&spec.key_column),
    );
    sql
}

/// Staging read-back in batch order.
pub(crate) fn staging_rows_sql(spec: &TableSpec) -> String {
    let mut sql = select_records(spec, &spec.staging);
    let _ = write!(
        sql,
        " ORDER BY {}, {}",
        quote_ident(&spec.modified_column),
        quote_ident(&spec.key_column),
    );
    sql
}

/// Plain insert of one record row into `table`.
pub(crate) fn insert_record_sql(spec: &TableSpec, table: &str, prefix: char) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        record_columns(spec),
        placeholders(record_width(spec), prefix),
    )
}

/// Insert-or-update merge keyed on the business key. Every non-key
/// column is overwritten from the incoming row.
pub(crate) fn upsert_sql(spec: &TableSpec, prefix: char) -> String {
    let mut updates: Vec<String> = spec
        .columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            format!("{ident} = excluded.{ident}")
        })
        .collect();
    for col in [&spec.created_column, &spec.modified_column] {
        let ident = quote_ident(col);
        updates.push(format!("{ident} = excluded.{ident}"));
    }

    format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}",
        insert_record_sql(spec, &spec.target, prefix),
        quote_ident(&spec.key_column),
        updates.join(", "),
    )
}

/// Upsert target read-back, ordered by key.
pub(crate) fn target_rows_sql(spec: &TableSpec) -> String {
    let mut sql = select_records(spec, &spec.target);
    let _ = write!(sql, " ORDER BY {}", quote_ident(&spec.key_column));
    sql
}

/// Quoted column list for a dimension row: version_id, key, tracked
/// columns, start_at, end_at, is_current.
pub(crate) fn dimension_columns(spec: &TableSpec) -> String {
    let mut cols = vec!["version_id".to_string(), quote_ident(&spec.key_column)];
    cols.extend(spec.columns.iter().map(|c| quote_ident(&c.name)));
    cols.extend(["start_at".to_string(), "end_at".to_string(), "is_current".to_string()]);
    cols.join(", ")
}

/// Read every open version (`end_at IS NULL`).
pub(crate) fn open_versions_sql(spec: &TableSpec) -> String {
    format!(
        "SELECT {} FROM {} WHERE end_at IS NULL",
        dimension_columns(spec),
        quote_ident(&spec.target),
    )
}

/// Full dimension read-back in per-key version order.
pub(crate) fn dimension_rows_sql(spec: &TableSpec) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {}, version_id",
        dimension_columns(spec),
        quote_ident(&spec.target),
        quote_ident(&spec.key_column),
    )
}

/// Insert a fresh open version. Binds: key, tracked columns, start_at.
pub(crate) fn insert_version_sql(spec: &TableSpec, prefix: char, current_literal: &str) -> String {
    let mut cols = vec![quote_ident(&spec.key_column)];
    cols.extend(spec.columns.iter().map(|c| quote_ident(&c.name)));
    cols.push("start_at".to_string());

    format!(
        "INSERT INTO {} ({}, end_at, is_current) VALUES ({}, NULL, {current_literal})",
        quote_ident(&spec.target),
        cols.join(", "),
        placeholders(spec.columns.len() + 2, prefix),
    )
}

/// Close an open version. Binds: end_at, version_id. The `end_at IS
/// NULL` guard makes a double close affect zero rows.
pub(crate) fn close_version_sql(spec: &TableSpec, prefix: char, closed_literal: &str) -> String {
    format!(
        "UPDATE {} SET end_at = {prefix}1, is_current = {closed_literal} \
         WHERE version_id = {prefix}2 AND end_at IS NULL",
        quote_ident(&spec.target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftmark_types::table::{ColumnSpec, DataType};

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
    fn placeholders_are_numbered() {
        assert_eq!(placeholders(3, '?'), "?1, ?2, ?3");
        assert_eq!(placeholders(2, '$'), "$1, $2");
        assert_eq!(placeholders(0, '$'), "");
    }

    #[test]
    fn fetch_changed_with_predicate() {
        let sql = fetch_changed_sql(&spec(), true, '?');
        assert_eq!(
            sql,
            "SELECT \"cust_id\", \"phone_no\", \"created_at\", \"modified_at\" \
             FROM \"src_customers\" \
             WHERE \"created_at\" > ?1 OR \"modified_at\" > ?2 \
             ORDER BY \"modified_at\", \"cust_id\""
        );
    }

    #[test]
    fn fetch_changed_without_predicate_selects_all() {
        let sql = fetch_changed_sql(&spec(), false, '$');
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY \"modified_at\", \"cust_id\""));
    }

    #[test]
    fn upsert_overwrites_non_key_columns() {
        let sql = upsert_sql(&spec(), '?');
        assert!(sql.contains("ON CONFLICT (\"cust_id\") DO UPDATE SET"));
        assert!(sql.contains("\"phone_no\" = excluded.\"phone_no\""));
        assert!(sql.contains("\"modified_at\" = excluded.\"modified_at\""));
        assert!(!sql.contains("\"cust_id\" = excluded"));
    }

    #[test]
    fn insert_version_leaves_end_open() {
        let sql = insert_version_sql(&spec(), '?', "1");
        assert!(sql.contains("NULL, 1)"));
        assert!(sql.starts_with("INSERT INTO \"dim_customers\""));
    }

    #[test]
    fn close_version_guards_open_rows() {
        let sql = close_version_sql(&spec(), '$', "FALSE");
        assert!(sql.contains("WHERE version_id = $2 AND end_at IS NULL"));
    }

    #[test]
    fn validate_spec_rejects_bad_identifier() {
        let mut bad = spec();
        bad.columns[0].name = "phone;drop".into();
        assert!(validate_spec(&bad).is_err());
        assert!(validate_spec(&spec()).is_ok());
    }
}
