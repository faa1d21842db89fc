//! `PostgreSQL`-backed implementation of [`ControlStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. The `postgres` crate manages its own internal tokio
//! runtime, so this works from any thread.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use driftmark_types::run::{PipelineId, RunRecord, RunStats, RunStatus};
use driftmark_types::time::{format_utc, parse_utc};
use driftmark_types::watermark::{Watermark, WatermarkEntry};
use postgres::{Client, NoTls};

use crate::backend::ControlStore;
use crate::error::{self, StateError};

/// Idempotent DDL for control tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS watermark_log (
    id BIGSERIAL PRIMARY KEY,
    pipeline TEXT NOT NULL,
    max_created_at TEXT NOT NULL,
    max_modified_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_watermark_pipeline ON watermark_log (pipeline, id);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id BIGSERIAL PRIMARY KEY,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    rows_extracted BIGINT NOT NULL DEFAULT 0,
    rows_published BIGINT NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs (pipeline, id);
";

/// `PostgreSQL`-backed control storage.
///
/// Create with [`PostgresControlStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=driftmark user=postgres"`).
pub struct PostgresControlStore {
    client: Mutex<Client>,
}

impl PostgresControlStore {
    /// Connect to a `PostgreSQL` database and initialize control tables.
    ///
    /// `connstr` is a libpq-style connection string or `PostgreSQL` URI.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if connection or DDL execution
    /// fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client = Client::connect(connstr, NoTls).map_err(StateError::backend)?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn parse_ts(context: &str, raw: &str) -> error::Result<DateTime<Utc>> {
        parse_utc(raw).map_err(|e| StateError::backend_context(context, e))
    }
}

impl ControlStore for PostgresControlStore {
    fn latest_watermark(&self, pipeline: &PipelineId) -> error::Result<Option<WatermarkEntry>> {
        Ok(self.watermark_history(pipeline, 1)?.into_iter().next())
    }

    fn append_watermark(
        &self,
        pipeline: &PipelineId,
        watermark: &Watermark,
        updated_at: DateTime<Utc>,
    ) -> error::Result<()> {
        let mut client = self.lock_client()?;
        client
            .execute(
                "INSERT INTO watermark_log (pipeline, max_created_at, max_modified_at, updated_at) \
                 VALUES ($1, $2, $3, $4)",
                &[
                    &pipeline.as_str(),
                    &format_utc(watermark.max_created_at),
                    &format_utc(watermark.max_modified_at),
                    &format_utc(updated_at),
                ],
            )
            .map_err(|e| StateError::backend_context("append_watermark: insert", e))?;
        Ok(())
    }

    fn watermark_history(
        &self,
        pipeline: &PipelineId,
        limit: u32,
    ) -> error::Result<Vec<WatermarkEntry>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT max_created_at, max_modified_at, updated_at \
                 FROM watermark_log WHERE pipeline = $1 ORDER BY id DESC LIMIT $2",
                &[&pipeline.as_str(), &i64::from(limit)],
            )
            .map_err(StateError::backend)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let created: String = row.get(0);
            let modified: String = row.get(1);
            let updated: String = row.get(2);
            entries.push(WatermarkEntry {
                watermark: Watermark {
                    max_created_at: Self::parse_ts("watermark_history: max_created_at", &created)?,
                    max_modified_at: Self::parse_ts(
                        "watermark_history: max_modified_at",
                        &modified,
                    )?,
                },
                updated_at: Self::parse_ts("watermark_history: updated_at", &updated)?,
            });
        }
        Ok(entries)
    }

    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "INSERT INTO pipeline_runs (pipeline, status, started_at) \
                 VALUES ($1, $2, $3) RETURNING id",
                &[
                    &pipeline.as_str(),
                    &RunStatus::Running.as_str(),
                    &format_utc(Utc::now()),
                ],
            )
            .map_err(StateError::backend)?;
        Ok(row.get(0))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
    ) -> error::Result<()> {
        let mut client = self.lock_client()?;
        client
            .execute(
                "UPDATE pipeline_runs SET status = $1, finished_at = $2, \
                 rows_extracted = $3, rows_published = $4, error_message = $5 \
                 WHERE id = $6",
                &[
                    &status.as_str(),
                    &format_utc(Utc::now()),
                    &(stats.rows_extracted as i64),
                    &(stats.rows_published as i64),
                    &stats.error_message,
                    &run_id,
                ],
            )
            .map_err(|e| StateError::backend_context("complete_run: update", e))?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn recent_runs(&self, pipeline: &PipelineId, limit: u32) -> error::Result<Vec<RunRecord>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT id, status, started_at, finished_at, rows_extracted, rows_published, \
                 error_message \
                 FROM pipeline_runs WHERE pipeline = $1 ORDER BY id DESC LIMIT $2",
                &[&pipeline.as_str(), &i64::from(limit)],
            )
            .map_err(StateError::backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status_raw: String = row.get(1);
            let status: RunStatus =
                status_raw
                    .parse()
                    .map_err(|e: String| StateError::BackendContext {
                        context: "recent_runs: status".into(),
                        source: e.into(),
                    })?;
            let started: String = row.get(2);
            let finished: Option<String> = row.get(3);
            let extracted: i64 = row.get(4);
            let published: i64 = row.get(5);
            let finished_at = match finished {
                Some(raw) => Some(Self::parse_ts("recent_runs: finished_at", &raw)?),
                None => None,
            };
            records.push(RunRecord {
                id: row.get(0),
                status,
                started_at: Self::parse_ts("recent_runs: started_at", &started)?,
                finished_at,
                rows_extracted: extracted as u64,
                rows_published: published as u64,
                error_message: row.get(6),
            });
        }
        Ok(records)
    }
}
