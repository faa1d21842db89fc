//! `SQLite`-backed implementation of [`ControlStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use driftmark_types::run::{PipelineId, RunRecord, RunStats, RunStatus};
use driftmark_types::time::{format_utc, parse_utc};
use driftmark_types::watermark::{Watermark, WatermarkEntry};
use rusqlite::Connection;

use crate::backend::ControlStore;
use crate::error::{self, StateError};

/// Idempotent DDL for control tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS watermark_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    max_created_at TEXT NOT NULL,
    max_modified_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_watermark_pipeline ON watermark_log (pipeline, id);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    rows_extracted INTEGER NOT NULL DEFAULT 0,
    rows_published INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs (pipeline, id);
";

/// `SQLite`-backed control storage.
///
/// Create with [`SqliteControlStore::open`] for file-backed persistence
/// or [`SqliteControlStore::in_memory`] for tests.
pub struct SqliteControlStore {
    conn: Mutex<Connection>,
}

impl SqliteControlStore {
    /// Open or create a `SQLite` control database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` control store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn parse_ts(context: &str, raw: &str) -> error::Result<DateTime<Utc>> {
        parse_utc(raw).map_err(|e| StateError::backend_context(context, e))
    }
}

impl ControlStore for SqliteControlStore {
    fn latest_watermark(&self, pipeline: &PipelineId) -> error::Result<Option<WatermarkEntry>> {
        Ok(self.watermark_history(pipeline, 1)?.into_iter().next())
    }

    fn append_watermark(
        &self,
        pipeline: &PipelineId,
        watermark: &Watermark,
        updated_at: DateTime<Utc>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO watermark_log (pipeline, max_created_at, max_modified_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                pipeline.as_str(),
                format_utc(watermark.max_created_at),
                format_utc(watermark.max_modified_at),
                format_utc(updated_at),
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
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT max_created_at, max_modified_at, updated_at \
                 FROM watermark_log WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(StateError::backend)?;

        let raw_rows = stmt
            .query_map(rusqlite::params![pipeline.as_str(), limit], |row| {
                let created: String = row.get(0)?;
                let modified: String = row.get(1)?;
                let updated: String = row.get(2)?;
                Ok((created, modified, updated))
            })
            .map_err(StateError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::backend)?;

        let mut entries = Vec::with_capacity(raw_rows.len());
        for (created, modified, updated) in raw_rows {
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
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline, status, started_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                RunStatus::Running.as_str(),
                format_utc(Utc::now()),
            ],
        )
        .map_err(StateError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = ?2, \
             rows_extracted = ?3, rows_published = ?4, error_message = ?5 \
             WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                format_utc(Utc::now()),
                stats.rows_extracted as i64,
                stats.rows_published as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(|e| StateError::backend_context("complete_run: update", e))?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn recent_runs(&self, pipeline: &PipelineId, limit: u32) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, status, started_at, finished_at, rows_extracted, rows_published, \
                 error_message \
                 FROM pipeline_runs WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(StateError::backend)?;

        let raw_rows = stmt
            .query_map(rusqlite::params![pipeline.as_str(), limit], |row| {
                let id: i64 = row.get(0)?;
                let status: String = row.get(1)?;
                let started: String = row.get(2)?;
                let finished: Option<String> = row.get(3)?;
                let extracted: i64 = row.get(4)?;
                let published: i64 = row.get(5)?;
                let error_message: Option<String> = row.get(6)?;
                Ok((id, status, started, finished, extracted, published, error_message))
            })
            .map_err(StateError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::backend)?;

        let mut records = Vec::with_capacity(raw_rows.len());
        for (id, status, started, finished, extracted, published, error_message) in raw_rows {
            let status: RunStatus = status
                .parse()
                .map_err(|e: String| StateError::BackendContext {
                    context: "recent_runs: status".into(),
                    source: e.into(),
                })?;
            let finished_at = match finished {
                Some(raw) => Some(Self::parse_ts("recent_runs: finished_at", &raw)?),
                None => None,
            };
            records.push(RunRecord {
                id,
                status,
                started_at: Self::parse_ts("recent_runs: started_at", &started)?,
                finished_at,
                rows_extracted: extracted as u64,
                rows_published: published as u64,
                error_message,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pid(name: &str) -> PipelineId {
        PipelineId::new(name)
    }

    fn ts(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, s).unwrap()
    }

    fn wm(created: u32, modified: u32) -> Watermark {
        Watermark {
            max_created_at: ts(created),
            max_modified_at: ts(modified),
        }
    }

    #[test]
    fn latest_watermark_absent_initially() {
        let store = SqliteControlStore::in_memory().unwrap();
        assert!(store.latest_watermark(&pid("p")).unwrap().is_none());
    }

    #[test]
    fn append_then_read_back() {
        let store = SqliteControlStore::in_memory().unwrap();
        store.append_watermark(&pid("p"), &wm(3, 5), ts(6)).unwrap();

        let entry = store.latest_watermark(&pid("p")).unwrap().unwrap();
        assert_eq!(entry.watermark, wm(3, 5));
        assert_eq!(entry.updated_at, ts(6));
    }

    #[test]
    fn latest_returns_newest_entry() {
        let store = SqliteControlStore::in_memory().unwrap();
        store.append_watermark(&pid("p"), &wm(1, 1), ts(1)).unwrap();
        store.append_watermark(&pid("p"), &wm(2, 2), ts(2)).unwrap();
        store.append_watermark(&pid("p"), &wm(9, 9), ts(9)).unwrap();

        let entry = store.latest_watermark(&pid("p")).unwrap().unwrap();
        assert_eq!(entry.watermark, wm(9, 9));
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let store = SqliteControlStore::in_memory().unwrap();
        for i in 1..=4 {
            store
                .append_watermark(&pid("p"), &wm(i, i), ts(i))
                .unwrap();
        }

        let history = store.watermark_history(&pid("p"), 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].watermark, wm(4, 4));
        assert_eq!(history[1].watermark, wm(3, 3));
    }

    #[test]
    fn pipelines_are_independent() {
        let store = SqliteControlStore::in_memory().unwrap();
        store.append_watermark(&pid("a"), &wm(1, 1), ts(1)).unwrap();
        store.append_watermark(&pid("b"), &wm(7, 7), ts(7)).unwrap();

        let a = store.latest_watermark(&pid("a")).unwrap().unwrap();
        let b = store.latest_watermark(&pid("b")).unwrap().unwrap();
        assert_eq!(a.watermark, wm(1, 1));
        assert_eq!(b.watermark, wm(7, 7));
    }

    #[test]
    fn run_lifecycle() {
        let store = SqliteControlStore::in_memory().unwrap();
        let run_id = store.start_run(&pid("p")).unwrap();
        assert!(run_id > 0);

        store
            .complete_run(
                run_id,
                RunStatus::Completed,
                &RunStats {
                    rows_extracted: 12,
                    rows_published: 12,
                    error_message: None,
                },
            )
            .unwrap();

        let runs = store.recent_runs(&pid("p"), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run_id);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].rows_extracted, 12);
        assert!(runs[0].finished_at.is_some());
    }

    #[test]
    fn run_failure_records_message() {
        let store = SqliteControlStore::in_memory().unwrap();
        let run_id = store.start_run(&pid("p")).unwrap();

        store
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunStats {
                    rows_extracted: 3,
                    rows_published: 0,
                    error_message: Some("connection reset".into()),
                },
            )
            .unwrap();

        let runs = store.recent_runs(&pid("p"), 1).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error_message, Some("connection reset".into()));
    }

    #[test]
    fn multiple_runs_get_distinct_increasing_ids() {
        let store = SqliteControlStore::in_memory().unwrap();
        let run1 = store.start_run(&pid("p")).unwrap();
        let run2 = store.start_run(&pid("p")).unwrap();
        assert!(run2 > run1);
    }
}
