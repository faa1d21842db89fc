//! `SQLite`-backed implementation of [`Warehouse`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. `SQLite`'s
//! dynamic typing carries the declared column types loosely; values
//! are converted through [`AttrValue`] at the boundary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use driftmark_types::record::{AttrValue, ChangeRecord};
use driftmark_types::scd2::{DimensionVersion, VersionAction};
use driftmark_types::table::{DataType, LoadMode, TableSpec};
use driftmark_types::time::{format_utc, parse_utc};
use driftmark_types::watermark::Watermark;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::backend::Warehouse;
use crate::error::{self, WarehouseError};
use crate::sql;

/// `SQLite`-backed warehouse.
///
/// Create with [`SqliteWarehouse::open`] for file-backed persistence
/// or [`SqliteWarehouse::in_memory`] for tests.
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

/// Map a rusqlite error, promoting constraint violations to
/// [`WarehouseError::Constraint`].
fn classify(context: &str, e: rusqlite::Error) -> WarehouseError {
    match &e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            WarehouseError::Constraint {
                context: format!("{context}: {}", msg.clone().unwrap_or_default()),
            }
        }
        _ => WarehouseError::backend_context(context, e),
    }
}

/// Storage class for a declared column type.
fn sqlite_type(dt: DataType) -> &'static str {
    match dt {
        DataType::Bigint => "INTEGER",
        DataType::Real => "REAL",
        // Timestamps are stored as RFC 3339 text.
        DataType::Text | DataType::Timestamp => "TEXT",
    }
}

fn attr_to_value(attr: &AttrValue) -> Value {
    match attr {
        AttrValue::Null => Value::Null,
        AttrValue::Integer(i) => Value::Integer(*i),
        AttrValue::Real(f) => Value::Real(*f),
        AttrValue::Text(s) => Value::Text(s.clone()),
    }
}

fn attr_from_value(column: &str, value: Value) -> error::Result<AttrValue> {
    match value {
        Value::Null => Ok(AttrValue::Null),
        Value::Integer(i) => Ok(AttrValue::Integer(i)),
        Value::Real(f) => Ok(AttrValue::Real(f)),
        Value::Text(s) => Ok(AttrValue::Text(s)),
        Value::Blob(_) => Err(WarehouseError::Data(format!(
            "column '{column}' holds a blob, which is not a supported attribute type"
        ))),
    }
}

/// Normalize a business key to text. Integer keys are common in source
/// relations owned by other systems.
fn key_from_value(value: Value) -> error::Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Null => Err(WarehouseError::Data("null business key".into())),
        other => Err(WarehouseError::Data(format!(
            "unsupported business key storage class: {other:?}"
        ))),
    }
}

fn ts_from_value(column: &str, value: Value) -> error::Result<DateTime<Utc>> {
    match value {
        Value::Text(s) => parse_utc(&s)
            .map_err(|e| WarehouseError::Data(format!("column '{column}': {e}"))),
        other => Err(WarehouseError::Data(format!(
            "column '{column}' holds {other:?}, expected a timestamp string"
        ))),
    }
}

/// Pull every column of the current row as owned values.
fn collect_values(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<Value>> {
    (0..width).map(|i| row.get_ref(i).map(Into::into)).collect()
}

/// Bind order for a record row: key, tracked columns, created, modified.
fn record_params(spec: &TableSpec, row: &ChangeRecord) -> Vec<Value> {
    let mut params = Vec::with_capacity(sql::record_width(spec));
    params.push(Value::Text(row.key.clone()));
    for col in &spec.columns {
        params.push(
            row.attributes
                .get(&col.name)
                .map_or(Value::Null, attr_to_value),
        );
    }
    params.push(Value::Text(format_utc(row.created_at)));
    params.push(Value::Text(format_utc(row.modified_at)));
    params
}

/// Bind order for a fresh version row: key, tracked columns, start_at.
fn version_params(spec: &TableSpec, record: &ChangeRecord, start_at: DateTime<Utc>) -> Vec<Value> {
    let mut params = Vec::with_capacity(spec.columns.len() + 2);
    params.push(Value::Text(record.key.clone()));
    for col in &spec.columns {
        params.push(
            record
                .attributes
                .get(&col.name)
                .map_or(Value::Null, attr_to_value),
        );
    }
    params.push(Value::Text(format_utc(start_at)));
    params
}

fn record_from_values(spec: &TableSpec, values: Vec<Value>) -> error::Result<ChangeRecord> {
    let mut it = values.into_iter();
    let take = |it: &mut dyn Iterator<Item = Value>| {
        it.next()
            .ok_or_else(|| WarehouseError::Data("row narrower than declared".into()))
    };

    let key = key_from_value(take(&mut it)?)?;
    let mut attributes = BTreeMap::new();
    for col in &spec.columns {
        attributes.insert(col.name.clone(), attr_from_value(&col.name, take(&mut it)?)?);
    }
    let created_at = ts_from_value(&spec.created_column, take(&mut it)?)?;
    let modified_at = ts_from_value(&spec.modified_column, take(&mut it)?)?;

    Ok(ChangeRecord {
        key,
        attributes,
        created_at,
        modified_at,
    })
}

fn version_from_values(spec: &TableSpec, values: Vec<Value>) -> error::Result<DimensionVersion> {
    let mut it = values.into_iter();
    let take = |it: &mut dyn Iterator<Item = Value>| {
        it.next()
            .ok_or_else(|| WarehouseError::Data("row narrower than declared".into()))
    };

    let version_id = match take(&mut it)? {
        Value::Integer(i) => i,
        other => {
            return Err(WarehouseError::Data(format!(
                "version_id holds {other:?}, expected an integer"
            )))
        }
    };
    let key = key_from_value(take(&mut it)?)?;
    let mut attributes = BTreeMap::new();
    for col in &spec.columns {
        attributes.insert(col.name.clone(), attr_from_value(&col.name, take(&mut it)?)?);
    }
    let start_at = ts_from_value("start_at", take(&mut it)?)?;
    let end_at = match take(&mut it)? {
        Value::Null => None,
        other => Some(ts_from_value("end_at", other)?),
    };
    let is_current = match take(&mut it)? {
        Value::Integer(i) => i != 0,
        other => {
            return Err(WarehouseError::Data(format!(
                "is_current holds {other:?}, expected an integer"
            )))
        }
    };

    Ok(DimensionVersion {
        version_id,
        key,
        attributes,
        start_at,
        end_at,
        is_current,
    })
}

impl SqliteWarehouse {
    /// Open or create a `SQLite` warehouse database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Io`] if the directory can't be
    /// created, or [`WarehouseError::Backend`] if the database can't be
    /// opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(WarehouseError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` warehouse (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Backend`] if the in-memory database
    /// can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(WarehouseError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| WarehouseError::LockPoisoned)
    }

    /// Insert rows into the source relation, simulating the upstream
    /// writer. Demo and test wiring; pipelines never write the source.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError`] on storage failure.
    pub fn insert_source_rows(
        &self,
        spec: &TableSpec,
        rows: &[ChangeRecord],
    ) -> error::Result<()> {
        sql::validate_spec(spec)?;
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| WarehouseError::backend_context("insert_source_rows: begin tx", e))?;
        {
            let mut stmt = tx
                .prepare(&sql::insert_record_sql(spec, &spec.source, '?'))
                .map_err(|e| WarehouseError::backend_context("insert_source_rows: prepare", e))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(record_params(spec, row)))
                    .map_err(|e| classify("insert_source_rows: execute", e))?;
            }
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("insert_source_rows: commit", e))?;
        Ok(())
    }

    /// Overwrite attributes of one source row and stamp its modified
    /// column, simulating an upstream change.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Data`] if no source row has `key`.
    pub fn update_source_row(
        &self,
        spec: &TableSpec,
        key: &str,
        attributes: &BTreeMap<String, AttrValue>,
        modified_at: DateTime<Utc>,
    ) -> error::Result<()> {
        sql::validate_spec(spec)?;
        let conn = self.lock_conn()?;

        let mut set_list = String::new();
        let mut params: Vec<Value> = Vec::with_capacity(attributes.len() + 2);
        for (idx, (name, value)) in attributes.iter().enumerate() {
            if !spec.columns.iter().any(|c| &c.name == name) {
                return Err(WarehouseError::Data(format!(
                    "'{name}' is not a declared column of '{}'",
                    spec.source
                )));
            }
            if idx > 0 {
                set_list.push_str(", ");
            }
            let _ = write!(set_list, "{} = ?{}", sql::quote_ident(name), idx + 1);
            params.push(attr_to_value(value));
        }
        let modified_idx = params.len() + 1;
        let key_idx = params.len() + 2;
        params.push(Value::Text(format_utc(modified_at)));
        params.push(Value::Text(key.to_string()));

        let update = format!(
            "UPDATE {} SET {set_list}{} {} = ?{modified_idx} WHERE {} = ?{key_idx}",
            sql::quote_ident(&spec.source),
            if attributes.is_empty() { "" } else { "," },
            sql::quote_ident(&spec.modified_column),
            sql::quote_ident(&spec.key_column),
        );
        let affected = conn
            .execute(&update, rusqlite::params_from_iter(params))
            .map_err(|e| classify("update_source_row: execute", e))?;
        if affected == 0 {
            return Err(WarehouseError::Data(format!(
                "no source row with key '{key}' in '{}'",
                spec.source
            )));
        }
        Ok(())
    }

    fn query_records(
        &self,
        spec: &TableSpec,
        sql_text: &str,
        params: &[Value],
        context: &str,
    ) -> error::Result<Vec<ChangeRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(sql_text)
            .map_err(|e| WarehouseError::backend_context(format!("{context}: prepare"), e))?;
        let width = sql::record_width(spec);
        let raw = stmt
            .query_map(rusqlite::params_from_iter(params.iter().cloned()), |row| {
                collect_values(row, width)
            })
            .map_err(|e| WarehouseError::backend_context(format!("{context}: query"), e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WarehouseError::backend_context(format!("{context}: fetch"), e))?;

        raw.into_iter()
            .map(|values| record_from_values(spec, values))
            .collect()
    }
}

impl Warehouse for SqliteWarehouse {
    fn ensure_tables(&self, spec: &TableSpec, mode: LoadMode) -> error::Result<()> {
        sql::validate_spec(spec)?;

        let col_defs: String = spec
            .columns
            .iter()
            .map(|c| format!("    {} {},\n", sql::quote_ident(&c.name), sqlite_type(c.data_type)))
            .collect();
        let key = sql::quote_ident(&spec.key_column);
        let created = sql::quote_ident(&spec.created_column);
        let modified = sql::quote_ident(&spec.modified_column);

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {key} TEXT PRIMARY KEY,\n{col_defs}    \
             {created} TEXT NOT NULL,\n    {modified} TEXT NOT NULL\n);\n",
            sql::quote_ident(&spec.source),
        );
        let _ = write!(
            ddl,
            "CREATE TABLE IF NOT EXISTS {} (\n    {key} TEXT NOT NULL,\n{col_defs}    \
             {created} TEXT NOT NULL,\n    {modified} TEXT NOT NULL\n);\n",
            sql::quote_ident(&spec.staging),
        );
        match mode {
            LoadMode::Upsert => {
                let _ = write!(
                    ddl,
                    "CREATE TABLE IF NOT EXISTS {} (\n    {key} TEXT PRIMARY KEY,\n{col_defs}    \
                     {created} TEXT NOT NULL,\n    {modified} TEXT NOT NULL\n);\n",
                    sql::quote_ident(&spec.target),
                );
            }
            LoadMode::Scd2 => {
                let _ = write!(
                    ddl,
                    "CREATE TABLE IF NOT EXISTS {} (\n    \
                     version_id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
                     {key} TEXT NOT NULL,\n{col_defs}    \
                     start_at TEXT NOT NULL,\n    end_at TEXT,\n    \
                     is_current INTEGER NOT NULL DEFAULT 1\n);\n\
                     CREATE INDEX IF NOT EXISTS {} ON {} ({key}, is_current);\n",
                    sql::quote_ident(&spec.target),
                    sql::quote_ident(&format!("idx_{}_open", spec.target)),
                    sql::quote_ident(&spec.target),
                );
            }
        }

        let conn = self.lock_conn()?;
        conn.execute_batch(&ddl)
            .map_err(|e| WarehouseError::backend_context("ensure_tables: ddl", e))?;
        Ok(())
    }

    fn fetch_changed(
        &self,
        spec: &TableSpec,
        since: Option<&Watermark>,
    ) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        let sql_text = sql::fetch_changed_sql(spec, since.is_some(), '?');
        let params: Vec<Value> = match since {
            Some(wm) => vec![
                Value::Text(format_utc(wm.max_created_at)),
                Value::Text(format_utc(wm.max_modified_at)),
            ],
            None => Vec::new(),
        };
        self.query_records(spec, &sql_text, &params, "fetch_changed")
    }

    fn replace_staging(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<()> {
        sql::validate_spec(spec)?;
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| WarehouseError::backend_context("replace_staging: begin tx", e))?;
        tx.execute(
            &format!("DELETE FROM {}", sql::quote_ident(&spec.staging)),
            [],
        )
        .map_err(|e| WarehouseError::backend_context("replace_staging: truncate", e))?;
        {
            let mut stmt = tx
                .prepare(&sql::insert_record_sql(spec, &spec.staging, '?'))
                .map_err(|e| WarehouseError::backend_context("replace_staging: prepare", e))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(record_params(spec, row)))
                    .map_err(|e| classify("replace_staging: execute", e))?;
            }
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("replace_staging: commit", e))?;
        Ok(())
    }

    fn staging_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        self.query_records(spec, &sql::staging_rows_sql(spec), &[], "staging_rows")
    }

    fn upsert(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<u64> {
        sql::validate_spec(spec)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| WarehouseError::backend_context("upsert: begin tx", e))?;
        {
            let mut stmt = tx
                .prepare(&sql::upsert_sql(spec, '?'))
                .map_err(|e| WarehouseError::backend_context("upsert: prepare", e))?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(record_params(spec, row)))
                    .map_err(|e| classify("upsert: execute", e))?;
            }
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("upsert: commit", e))?;
        Ok(rows.len() as u64)
    }

    fn target_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        self.query_records(spec, &sql::target_rows_sql(spec), &[], "target_rows")
    }

    fn open_versions(
        &self,
        spec: &TableSpec,
        keys: &[String],
    ) -> error::Result<HashMap<String, DimensionVersion>> {
        sql::validate_spec(spec)?;
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&sql::open_versions_sql(spec))
            .map_err(|e| WarehouseError::backend_context("open_versions: prepare", e))?;
        let width = sql::record_width(spec) + 2;
        let raw = stmt
            .query_map([], |row| collect_values(row, width))
            .map_err(|e| WarehouseError::backend_context("open_versions: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WarehouseError::backend_context("open_versions: fetch", e))?;
        drop(stmt);
        drop(conn);

        let mut open = HashMap::new();
        for values in raw {
            let version = version_from_values(spec, values)?;
            if !wanted.contains(version.key.as_str()) {
                continue;
            }
            if let Some(previous) = open.insert(version.key.clone(), version) {
                return Err(WarehouseError::Data(format!(
                    "multiple open versions for key '{}' in '{}'",
                    previous.key, spec.target
                )));
            }
        }
        Ok(open)
    }

    fn apply_version_actions(
        &self,
        spec: &TableSpec,
        actions: &[VersionAction],
    ) -> error::Result<u64> {
        sql::validate_spec(spec)?;
        if actions.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| WarehouseError::backend_context("apply_version_actions: begin tx", e))?;
        let mut opened = 0u64;
        {
            let mut insert = tx
                .prepare(&sql::insert_version_sql(spec, '?', "1"))
                .map_err(|e| {
                    WarehouseError::backend_context("apply_version_actions: prepare insert", e)
                })?;
            let mut close = tx
                .prepare(&sql::close_version_sql(spec, '?', "0"))
                .map_err(|e| {
                    WarehouseError::backend_context("apply_version_actions: prepare close", e)
                })?;

            for action in actions {
                match action {
                    VersionAction::Open { record, start_at } => {
                        insert
                            .execute(rusqlite::params_from_iter(version_params(
                                spec, record, *start_at,
                            )))
                            .map_err(|e| classify("apply_version_actions: open", e))?;
                        opened += 1;
                    }
                    VersionAction::CloseAndOpen {
                        version_id,
                        record,
                        at,
                    } => {
                        let affected = close
                            .execute(rusqlite::params![format_utc(*at), version_id])
                            .map_err(|e| classify("apply_version_actions: close", e))?;
                        if affected != 1 {
                            return Err(WarehouseError::Constraint {
                                context: format!(
                                    "version {version_id} of key '{}' is not open",
                                    record.key
                                ),
                            });
                        }
                        insert
                            .execute(rusqlite::params_from_iter(version_params(
                                spec, record, *at,
                            )))
                            .map_err(|e| classify("apply_version_actions: reopen", e))?;
                        opened += 1;
                    }
                }
            }
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("apply_version_actions: commit", e))?;
        Ok(opened)
    }

    fn dimension_rows(&self, spec: &TableSpec) -> error::Result<Vec<DimensionVersion>> {
        sql::validate_spec(spec)?;
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&sql::dimension_rows_sql(spec))
            .map_err(|e| WarehouseError::backend_context("dimension_rows: prepare", e))?;
        let width = sql::record_width(spec) + 2;
        let raw = stmt
            .query_map([], |row| collect_values(row, width))
            .map_err(|e| WarehouseError::backend_context("dimension_rows: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WarehouseError::backend_context("dimension_rows: fetch", e))?;
        drop(stmt);
        drop(conn);

        raw.into_iter()
            .map(|values| version_from_values(spec, values))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use driftmark_types::table::{ColumnSpec, DataType};

    fn ts(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, s).unwrap()
    }

    fn spec() -> TableSpec {
        TableSpec {
            source: "src_customers".into(),
            staging: "stg_customers".into(),
            target: "tgt_customers".into(),
            key_column: "cust_id".into(),
            created_column: "created_at".into(),
            modified_column: "modified_at".into(),
            columns: vec![ColumnSpec {
                name: "phone_no".into(),
                data_type: DataType::Text,
            }],
        }
    }

    fn record(key: &str, phone: &str, created: u32, modified: u32) -> ChangeRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("phone_no".into(), AttrValue::Text(phone.into()));
        ChangeRecord {
            key: key.into(),
            attributes,
            created_at: ts(created),
            modified_at: ts(modified),
        }
    }

    fn warehouse(mode: LoadMode) -> SqliteWarehouse {
        let wh = SqliteWarehouse::in_memory().unwrap();
        wh.ensure_tables(&spec(), mode).unwrap();
        wh
    }

    #[test]
    fn ensure_tables_is_idempotent() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        wh.ensure_tables(&spec(), LoadMode::Upsert).unwrap();
        wh.ensure_tables(&spec(), LoadMode::Upsert).unwrap();
        wh.ensure_tables(&spec(), LoadMode::Scd2).unwrap();
    }

    #[test]
    fn fetch_changed_without_watermark_selects_all() {
        let wh = warehouse(LoadMode::Upsert);
        wh.insert_source_rows(
            &spec(),
            &[record("1", "555-0001", 1, 1), record("2", "555-0002", 2, 2)],
        )
        .unwrap();

        let rows = wh.fetch_changed(&spec(), None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "1");
        assert_eq!(rows[1].key, "2");
    }

    #[test]
    fn fetch_changed_bounds_by_watermark() {
        let wh = warehouse(LoadMode::Upsert);
        wh.insert_source_rows(
            &spec(),
            &[record("1", "555-0001", 1, 1), record("2", "555-0002", 5, 5)],
        )
        .unwrap();

        let wm = Watermark {
            max_created_at: ts(2),
            max_modified_at: ts(2),
        };
        let rows = wh.fetch_changed(&spec(), Some(&wm)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "2");
    }

    #[test]
    fn fetch_changed_catches_modified_only_rows() {
        let wh = warehouse(LoadMode::Upsert);
        wh.insert_source_rows(&spec(), &[record("1", "555-0001", 1, 1)])
            .unwrap();
        let mut update = BTreeMap::new();
        update.insert("phone_no".to_string(), AttrValue::Text("555-9999".into()));
        wh.update_source_row(&spec(), "1", &update, ts(8)).unwrap();

        let wm = Watermark {
            max_created_at: ts(5),
            max_modified_at: ts(5),
        };
        let rows = wh.fetch_changed(&spec(), Some(&wm)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].attributes.get("phone_no"),
            Some(&AttrValue::Text("555-9999".into()))
        );
        assert_eq!(rows[0].modified_at, ts(8));
    }

    #[test]
    fn replace_staging_truncates_previous_run() {
        let wh = warehouse(LoadMode::Upsert);
        wh.replace_staging(&spec(), &[record("1", "a", 1, 1), record("2", "b", 2, 2)])
            .unwrap();
        wh.replace_staging(&spec(), &[record("3", "c", 3, 3)])
            .unwrap();

        let rows = wh.staging_rows(&spec()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "3");
    }

    #[test]
    fn replace_staging_with_empty_batch_clears() {
        let wh = warehouse(LoadMode::Upsert);
        wh.replace_staging(&spec(), &[record("1", "a", 1, 1)])
            .unwrap();
        wh.replace_staging(&spec(), &[]).unwrap();
        assert!(wh.staging_rows(&spec()).unwrap().is_empty());
    }

    #[test]
    fn upsert_inserts_then_updates_in_place() {
        let wh = warehouse(LoadMode::Upsert);
        wh.upsert(&spec(), &[record("1", "old", 1, 1)]).unwrap();
        wh.upsert(&spec(), &[record("1", "new", 1, 5), record("2", "b", 2, 2)])
            .unwrap();

        let rows = wh.target_rows(&spec()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].attributes.get("phone_no"),
            Some(&AttrValue::Text("new".into()))
        );
        assert_eq!(rows[0].modified_at, ts(5));
    }

    #[test]
    fn upsert_is_idempotent() {
        let wh = warehouse(LoadMode::Upsert);
        let batch = [record("1", "a", 1, 1), record("2", "b", 2, 2)];
        wh.upsert(&spec(), &batch).unwrap();
        let first = wh.target_rows(&spec()).unwrap();
        wh.upsert(&spec(), &batch).unwrap();
        let second = wh.target_rows(&spec()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn open_versions_empty_for_new_keys() {
        let wh = warehouse(LoadMode::Scd2);
        let open = wh.open_versions(&spec(), &["1".into()]).unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn version_open_then_close_and_open() {
        let wh = warehouse(LoadMode::Scd2);
        wh.apply_version_actions(
            &spec(),
            &[VersionAction::Open {
                record: record("1", "555-0001", 0, 0),
                start_at: ts(0),
            }],
        )
        .unwrap();

        let open = wh.open_versions(&spec(), &["1".into()]).unwrap();
        let v1 = open.get("1").unwrap();
        assert!(v1.is_open());
        assert_eq!(v1.start_at, ts(0));

        wh.apply_version_actions(
            &spec(),
            &[VersionAction::CloseAndOpen {
                version_id: v1.version_id,
                record: record("1", "555-0002", 0, 1),
                at: ts(1),
            }],
        )
        .unwrap();

        let history = wh.dimension_rows(&spec()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].end_at, Some(ts(1)));
        assert!(!history[0].is_current);
        assert_eq!(history[1].start_at, ts(1));
        assert!(history[1].is_open());
    }

    #[test]
    fn closing_a_closed_version_is_a_constraint_fault() {
        let wh = warehouse(LoadMode::Scd2);
        wh.apply_version_actions(
            &spec(),
            &[VersionAction::Open {
                record: record("1", "a", 0, 0),
                start_at: ts(0),
            }],
        )
        .unwrap();
        let v1 = wh.open_versions(&spec(), &["1".into()]).unwrap()["1"].version_id;
        wh.apply_version_actions(
            &spec(),
            &[VersionAction::CloseAndOpen {
                version_id: v1,
                record: record("1", "b", 0, 1),
                at: ts(1),
            }],
        )
        .unwrap();

        let err = wh
            .apply_version_actions(
                &spec(),
                &[VersionAction::CloseAndOpen {
                    version_id: v1,
                    record: record("1", "c", 0, 2),
                    at: ts(2),
                }],
            )
            .expect_err("closing a closed version must fail");
        assert!(matches!(err, WarehouseError::Constraint { .. }));

        // The failed batch rolled back: still exactly two versions.
        assert_eq!(wh.dimension_rows(&spec()).unwrap().len(), 2);
    }

    #[test]
    fn key_normalization_accepts_integers() {
        assert_eq!(key_from_value(Value::Integer(42)).unwrap(), "42");
        assert_eq!(key_from_value(Value::Text("K1".into())).unwrap(), "K1");
        assert!(key_from_value(Value::Null).is_err());
    }

    #[test]
    fn rejects_spec_with_invalid_identifier() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut bad = spec();
        bad.target = "tgt; DROP TABLE x".into();
        let err = wh.ensure_tables(&bad, LoadMode::Upsert).unwrap_err();
        assert!(matches!(err, WarehouseError::Data(_)));
    }
}
