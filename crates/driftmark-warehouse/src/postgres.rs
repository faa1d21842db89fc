//! `PostgreSQL`-backed implementation of [`Warehouse`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>`.
//! Columns are typed per the declared [`DataType`], so attribute values
//! are bound and read with matching Rust types.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use driftmark_types::record::{AttrValue, ChangeRecord};
use driftmark_types::scd2::{DimensionVersion, VersionAction};
use driftmark_types::table::{DataType, LoadMode, TableSpec};
use driftmark_types::time::{format_utc, parse_utc};
use driftmark_types::watermark::Watermark;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};

use crate::backend::Warehouse;
use crate::error::{self, WarehouseError};
use crate::sql;

/// `PostgreSQL`-backed warehouse.
///
/// Create with [`PostgresWarehouse::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=warehouse user=postgres"`).
pub struct PostgresWarehouse {
    client: Mutex<Client>,
}

/// Map a postgres error, promoting integrity-constraint violations
/// (SQLSTATE class 23) to [`WarehouseError::Constraint`].
fn classify(context: &str, e: postgres::Error) -> WarehouseError {
    if let Some(db) = e.as_db_error() {
        if db.code().code().starts_with("23") {
            return WarehouseError::Constraint {
                context: format!("{context}: {}", db.message()),
            };
        }
    }
    WarehouseError::backend_context(context, e)
}

/// Column type for a declared data type.
fn pg_type(dt: DataType) -> &'static str {
    match dt {
        DataType::Bigint => "BIGINT",
        DataType::Real => "DOUBLE PRECISION",
        // Timestamps are stored as RFC 3339 text.
        DataType::Text | DataType::Timestamp => "TEXT",
    }
}

/// Owned bind value with the concrete Rust type the column expects.
#[derive(Debug)]
enum PgValue {
    I64(Option<i64>),
    F64(Option<f64>),
    Text(Option<String>),
}

impl PgValue {
    fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::I64(v) => v,
            Self::F64(v) => v,
            Self::Text(v) => v,
        }
    }
}

/// Convert an attribute to the bind value its declared column expects.
#[allow(clippy::cast_precision_loss)]
fn bind_attr(column: &str, dt: DataType, attr: &AttrValue) -> error::Result<PgValue> {
    match (dt, attr) {
        (DataType::Bigint, AttrValue::Null) => Ok(PgValue::I64(None)),
        (DataType::Real, AttrValue::Null) => Ok(PgValue::F64(None)),
        (DataType::Text | DataType::Timestamp, AttrValue::Null) => Ok(PgValue::Text(None)),
        (DataType::Bigint, AttrValue::Integer(i)) => Ok(PgValue::I64(Some(*i))),
        (DataType::Real, AttrValue::Integer(i)) => Ok(PgValue::F64(Some(*i as f64))),
        (DataType::Real, AttrValue::Real(f)) => Ok(PgValue::F64(Some(*f))),
        (DataType::Text | DataType::Timestamp, AttrValue::Text(s)) => {
            Ok(PgValue::Text(Some(s.clone())))
        }
        (DataType::Text | DataType::Timestamp, AttrValue::Integer(i)) => {
            Ok(PgValue::Text(Some(i.to_string())))
        }
        (DataType::Text | DataType::Timestamp, AttrValue::Real(f)) => {
            Ok(PgValue::Text(Some(f.to_string())))
        }
        (dt, other) => Err(WarehouseError::Data(format!(
            "column '{column}' declared {dt:?} cannot hold a {} value",
            other.type_name()
        ))),
    }
}

/// Bind order for a record row: key, tracked columns, created, modified.
fn record_params(spec: &TableSpec, row: &ChangeRecord) -> error::Result<Vec<PgValue>> {
    let mut params = Vec::with_capacity(sql::record_width(spec));
    params.push(PgValue::Text(Some(row.key.clone())));
    for col in &spec.columns {
        let attr = row.attributes.get(&col.name).unwrap_or(&AttrValue::Null);
        params.push(bind_attr(&col.name, col.data_type, attr)?);
    }
    params.push(PgValue::Text(Some(format_utc(row.created_at))));
    params.push(PgValue::Text(Some(format_utc(row.modified_at))));
    Ok(params)
}

/// Bind order for a fresh version row: key, tracked columns, start_at.
fn version_params(
    spec: &TableSpec,
    record: &ChangeRecord,
    start_at: DateTime<Utc>,
) -> error::Result<Vec<PgValue>> {
    let mut params = Vec::with_capacity(spec.columns.len() + 2);
    params.push(PgValue::Text(Some(record.key.clone())));
    for col in &spec.columns {
        let attr = record.attributes.get(&col.name).unwrap_or(&AttrValue::Null);
        params.push(bind_attr(&col.name, col.data_type, attr)?);
    }
    params.push(PgValue::Text(Some(format_utc(start_at))));
    Ok(params)
}

fn refs(values: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(PgValue::as_tosql).collect()
}

/// Normalize the business key at `idx` to text.
fn key_from_row(row: &Row, idx: usize) -> error::Result<String> {
    if let Ok(text) = row.try_get::<_, String>(idx) {
        return Ok(text);
    }
    if let Ok(int) = row.try_get::<_, i64>(idx) {
        return Ok(int.to_string());
    }
    if let Ok(int) = row.try_get::<_, i32>(idx) {
        return Ok(int.to_string());
    }
    Err(WarehouseError::Data(
        "business key is null or has an unsupported column type".into(),
    ))
}

fn attr_from_row(row: &Row, idx: usize, column: &str, dt: DataType) -> error::Result<AttrValue> {
    let context = |e: postgres::Error| WarehouseError::Data(format!("column '{column}': {e}"));
    match dt {
        DataType::Bigint => Ok(row
            .try_get::<_, Option<i64>>(idx)
            .map_err(context)?
            .map_or(AttrValue::Null, AttrValue::Integer)),
        DataType::Real => Ok(row
            .try_get::<_, Option<f64>>(idx)
            .map_err(context)?
            .map_or(AttrValue::Null, AttrValue::Real)),
        DataType::Text | DataType::Timestamp => Ok(row
            .try_get::<_, Option<String>>(idx)
            .map_err(context)?
            .map_or(AttrValue::Null, AttrValue::Text)),
    }
}

fn ts_from_row(row: &Row, idx: usize, column: &str) -> error::Result<DateTime<Utc>> {
    let raw: String = row
        .try_get(idx)
        .map_err(|e| WarehouseError::Data(format!("column '{column}': {e}")))?;
    parse_utc(&raw).map_err(|e| WarehouseError::Data(format!("column '{column}': {e}")))
}

fn record_from_row(spec: &TableSpec, row: &Row) -> error::Result<ChangeRecord> {
    let key = key_from_row(row, 0)?;
    let mut attributes = BTreeMap::new();
    for (i, col) in spec.columns.iter().enumerate() {
        attributes.insert(
            col.name.clone(),
            attr_from_row(row, i + 1, &col.name, col.data_type)?,
        );
    }
    let created_idx = spec.columns.len() + 1;
    Ok(ChangeRecord {
        key,
        attributes,
        created_at: ts_from_row(row, created_idx, &spec.created_column)?,
        modified_at: ts_from_row(row, created_idx + 1, &spec.modified_column)?,
    })
}

fn version_from_row(spec: &TableSpec, row: &Row) -> error::Result<DimensionVersion> {
    let version_id: i64 = row
        .try_get(0)
        .map_err(|e| WarehouseError::Data(format!("version_id: {e}")))?;
    let key = key_from_row(row, 1)?;
    let mut attributes = BTreeMap::new();
    for (i, col) in spec.columns.iter().enumerate() {
        attributes.insert(
            col.name.clone(),
            attr_from_row(row, i + 2, &col.name, col.data_type)?,
        );
    }
    let start_idx = spec.columns.len() + 2;
    let end_raw: Option<String> = row
        .try_get(start_idx + 1)
        .map_err(|e| WarehouseError::Data(format!("end_at: {e}")))?;
    let end_at = match end_raw {
        Some(raw) => Some(
            parse_utc(&raw).map_err(|e| WarehouseError::Data(format!("end_at: {e}")))?,
        ),
        None => None,
    };
    let is_current: bool = row
        .try_get(start_idx + 2)
        .map_err(|e| WarehouseError::Data(format!("is_current: {e}")))?;

    Ok(DimensionVersion {
        version_id,
        key,
        attributes,
        start_at: ts_from_row(row, start_idx, "start_at")?,
        end_at,
        is_current,
    })
}

impl PostgresWarehouse {
    /// Connect to a `PostgreSQL` warehouse database.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Backend`] if the connection fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let client = Client::connect(connstr, NoTls).map_err(WarehouseError::backend)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| WarehouseError::LockPoisoned)
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
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| WarehouseError::backend_context("insert_source_rows: begin tx", e))?;
        let stmt = tx
            .prepare(&sql::insert_record_sql(spec, &spec.source, '$'))
            .map_err(|e| WarehouseError::backend_context("insert_source_rows: prepare", e))?;
        for row in rows {
            let values = record_params(spec, row)?;
            tx.execute(&stmt, &refs(&values))
                .map_err(|e| classify("insert_source_rows: execute", e))?;
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
        let mut client = self.lock_client()?;

        let mut set_list = String::new();
        let mut values: Vec<PgValue> = Vec::with_capacity(attributes.len() + 2);
        for (name, value) in attributes {
            let Some(col) = spec.columns.iter().find(|c| &c.name == name) else {
                return Err(WarehouseError::Data(format!(
                    "'{name}' is not a declared column of '{}'",
                    spec.source
                )));
            };
            if !set_list.is_empty() {
                set_list.push_str(", ");
            }
            let _ = write!(
                set_list,
                "{} = ${}",
                sql::quote_ident(name),
                values.len() + 1
            );
            values.push(bind_attr(name, col.data_type, value)?);
        }
        let modified_idx = values.len() + 1;
        let key_idx = values.len() + 2;
        values.push(PgValue::Text(Some(format_utc(modified_at))));
        values.push(PgValue::Text(Some(key.to_string())));

        let update = format!(
            "UPDATE {} SET {set_list}{} {} = ${modified_idx} WHERE {} = ${key_idx}",
            sql::quote_ident(&spec.source),
            if attributes.is_empty() { "" } else { "," },
            sql::quote_ident(&spec.modified_column),
            sql::quote_ident(&spec.key_column),
        );
        let affected = client
            .execute(&update, &refs(&values))
            .map_err(|e| classify("update_source_row: execute", e))?;
        if affected == 0 {
            return Err(WarehouseError::Data(format!(
                "no source row with key '{key}' in '{}'",
                spec.source
            )));
        }
        Ok(())
    }
}

impl Warehouse for PostgresWarehouse {
    fn ensure_tables(&self, spec: &TableSpec, mode: LoadMode) -> error::Result<()> {
        sql::validate_spec(spec)?;

        let col_defs: String = spec
            .columns
            .iter()
            .map(|c| format!("    {} {},\n", sql::quote_ident(&c.name), pg_type(c.data_type)))
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
                     version_id BIGSERIAL PRIMARY KEY,\n    \
                     {key} TEXT NOT NULL,\n{col_defs}    \
                     start_at TEXT NOT NULL,\n    end_at TEXT,\n    \
                     is_current BOOLEAN NOT NULL DEFAULT TRUE\n);\n\
                     CREATE INDEX IF NOT EXISTS {} ON {} ({key}, is_current);\n",
                    sql::quote_ident(&spec.target),
                    sql::quote_ident(&format!("idx_{}_open", spec.target)),
                    sql::quote_ident(&spec.target),
                );
            }
        }

        let mut client = self.lock_client()?;
        client
            .batch_execute(&ddl)
            .map_err(|e| WarehouseError::backend_context("ensure_tables: ddl", e))?;
        Ok(())
    }

    fn fetch_changed(
        &self,
        spec: &TableSpec,
        since: Option<&Watermark>,
    ) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        let sql_text = sql::fetch_changed_sql(spec, since.is_some(), '$');
        let mut client = self.lock_client()?;
        let rows = match since {
            Some(wm) => client.query(
                &sql_text,
                &[
                    &format_utc(wm.max_created_at),
                    &format_utc(wm.max_modified_at),
                ],
            ),
            None => client.query(&sql_text, &[]),
        }
        .map_err(|e| WarehouseError::backend_context("fetch_changed: query", e))?;

        rows.iter().map(|row| record_from_row(spec, row)).collect()
    }

    fn replace_staging(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<()> {
        sql::validate_spec(spec)?;
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| WarehouseError::backend_context("replace_staging: begin tx", e))?;
        tx.execute(
            &format!("DELETE FROM {}", sql::quote_ident(&spec.staging)),
            &[],
        )
        .map_err(|e| WarehouseError::backend_context("replace_staging: truncate", e))?;
        let stmt = tx
            .prepare(&sql::insert_record_sql(spec, &spec.staging, '$'))
            .map_err(|e| WarehouseError::backend_context("replace_staging: prepare", e))?;
        for row in rows {
            let values = record_params(spec, row)?;
            tx.execute(&stmt, &refs(&values))
                .map_err(|e| classify("replace_staging: execute", e))?;
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("replace_staging: commit", e))?;
        Ok(())
    }

    fn staging_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        let mut client = self.lock_client()?;
        let rows = client
            .query(&sql::staging_rows_sql(spec), &[])
            .map_err(|e| WarehouseError::backend_context("staging_rows: query", e))?;
        rows.iter().map(|row| record_from_row(spec, row)).collect()
    }

    fn upsert(&self, spec: &TableSpec, rows: &[ChangeRecord]) -> error::Result<u64> {
        sql::validate_spec(spec)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| WarehouseError::backend_context("upsert: begin tx", e))?;
        let stmt = tx
            .prepare(&sql::upsert_sql(spec, '$'))
            .map_err(|e| WarehouseError::backend_context("upsert: prepare", e))?;
        for row in rows {
            let values = record_params(spec, row)?;
            tx.execute(&stmt, &refs(&values))
                .map_err(|e| classify("upsert: execute", e))?;
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("upsert: commit", e))?;
        Ok(rows.len() as u64)
    }

    fn target_rows(&self, spec: &TableSpec) -> error::Result<Vec<ChangeRecord>> {
        sql::validate_spec(spec)?;
        let mut client = self.lock_client()?;
        let rows = client
            .query(&sql::target_rows_sql(spec), &[])
            .map_err(|e| WarehouseError::backend_context("target_rows: query", e))?;
        rows.iter().map(|row| record_from_row(spec, row)).collect()
    }

    fn open_versions(
        &self,
        spec: &TableSpec,
        keys: &[String],
    ) -> error::Result<HashMap<String, DimensionVersion>> {
        sql::validate_spec(spec)?;
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut client = self.lock_client()?;
        let rows = client
            .query(&sql::open_versions_sql(spec), &[])
            .map_err(|e| WarehouseError::backend_context("open_versions: query", e))?;
        drop(client);

        let mut open = HashMap::new();
        for row in &rows {
            let version = version_from_row(spec, row)?;
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
        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| WarehouseError::backend_context("apply_version_actions: begin tx", e))?;
        let insert = tx
            .prepare(&sql::insert_version_sql(spec, '$', "TRUE"))
            .map_err(|e| {
                WarehouseError::backend_context("apply_version_actions: prepare insert", e)
            })?;
        let close = tx
            .prepare(&sql::close_version_sql(spec, '$', "FALSE"))
            .map_err(|e| {
                WarehouseError::backend_context("apply_version_actions: prepare close", e)
            })?;

        let mut opened = 0u64;
        for action in actions {
            match action {
                VersionAction::Open { record, start_at } => {
                    let values = version_params(spec, record, *start_at)?;
                    tx.execute(&insert, &refs(&values))
                        .map_err(|e| classify("apply_version_actions: open", e))?;
                    opened += 1;
                }
                VersionAction::CloseAndOpen {
                    version_id,
                    record,
                    at,
                } => {
                    let affected = tx
                        .execute(&close, &[&format_utc(*at), version_id])
                        .map_err(|e| classify("apply_version_actions: close", e))?;
                    if affected != 1 {
                        return Err(WarehouseError::Constraint {
                            context: format!(
                                "version {version_id} of key '{}' is not open",
                                record.key
                            ),
                        });
                    }
                    let values = version_params(spec, record, *at)?;
                    tx.execute(&insert, &refs(&values))
                        .map_err(|e| classify("apply_version_actions: reopen", e))?;
                    opened += 1;
                }
            }
        }
        tx.commit()
            .map_err(|e| WarehouseError::backend_context("apply_version_actions: commit", e))?;
        Ok(opened)
    }

    fn dimension_rows(&self, spec: &TableSpec) -> error::Result<Vec<DimensionVersion>> {
        sql::validate_spec(spec)?;
        let mut client = self.lock_client()?;
        let rows = client
            .query(&sql::dimension_rows_sql(spec), &[])
            .map_err(|e| WarehouseError::backend_context("dimension_rows: query", e))?;
        drop(client);
        rows.iter().map(|row| version_from_row(spec, row)).collect()
    }
}
