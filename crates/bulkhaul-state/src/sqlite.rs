//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bulkhaul_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
use bulkhaul_types::ResumeState;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS resume_states (
    pipeline TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS next_configs (
    pipeline TEXT PRIMARY KEY,
    config_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    partitions INTEGER DEFAULT 0,
    partitions_failed INTEGER DEFAULT 0,
    records INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_job_runs_pipeline ON job_runs (pipeline, id);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        debug!(path = %path.display(), "opened sqlite state backend");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }
}

impl StateBackend for SqliteStateBackend {
    fn save_resume_state(&self, pipeline: &PipelineId, state: &ResumeState) -> error::Result<()> {
        let json = serde_json::to_string(state)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO resume_states (pipeline, state_json, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(pipeline) DO UPDATE SET state_json = ?2, updated_at = ?3",
            rusqlite::params![pipeline.as_str(), json, Self::now_sqlite()],
        )?;
        Ok(())
    }

    fn load_resume_state(&self, pipeline: &PipelineId) -> error::Result<Option<ResumeState>> {
        let conn = self.lock_conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM resume_states WHERE pipeline = ?1",
                [pipeline.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StateError::from))
            .transpose()
    }

    fn clear_resume_state(&self, pipeline: &PipelineId) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM resume_states WHERE pipeline = ?1",
            [pipeline.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn save_next_config(
        &self,
        pipeline: &PipelineId,
        config: &serde_json::Value,
    ) -> error::Result<()> {
        let json = serde_json::to_string(config)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO next_configs (pipeline, config_json, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(pipeline) DO UPDATE SET config_json = ?2, updated_at = ?3",
            rusqlite::params![pipeline.as_str(), json, Self::now_sqlite()],
        )?;
        Ok(())
    }

    fn load_next_config(&self, pipeline: &PipelineId) -> error::Result<Option<serde_json::Value>> {
        let conn = self.lock_conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT config_json FROM next_configs WHERE pipeline = ?1",
                [pipeline.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StateError::from))
            .transpose()
    }

    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO job_runs (pipeline, status) VALUES (?1, ?2)",
            rusqlite::params![pipeline.as_str(), RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = datetime('now'), \
             partitions = ?2, partitions_failed = ?3, records = ?4, error_message = ?5 \
             WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                stats.partitions as i64,
                stats.partitions_failed as i64,
                stats.records as i64,
                stats.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn list_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, status, started_at, finished_at, partitions, partitions_failed, \
             records, error_message FROM job_runs WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![pipeline.as_str(), limit as i64],
            |row| {
                let status: String = row.get(1)?;
                let started_at: String = row.get(2)?;
                let finished_at: Option<String> = row.get(3)?;
                let partitions: i64 = row.get(4)?;
                let partitions_failed: i64 = row.get(5)?;
                let records: i64 = row.get(6)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    status,
                    started_at,
                    finished_at,
                    RunStats {
                        partitions: partitions as u64,
                        partitions_failed: partitions_failed as u64,
                        records: records as u64,
                        error_message: row.get(7)?,
                    },
                ))
            },
        )?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, status, started_at, finished_at, stats) = row?;
            runs.push(RunRecord {
                id,
                pipeline: pipeline.clone(),
                status: status.parse().unwrap_or(RunStatus::Failed),
                started_at: Self::sqlite_to_iso8601(&started_at),
                finished_at: finished_at.as_deref().map(Self::sqlite_to_iso8601),
                stats,
            });
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkhaul_types::{Schema, TaskReport, TaskSource, Type};

    fn pid(name: &str) -> PipelineId {
        PipelineId::new(name)
    }

    fn resume_state() -> ResumeState {
        let schema = Schema::builder().add("id", Type::Long).add("name", Type::String).build();
        let mut input_task = TaskSource::new();
        input_task.set("partitions", 2);
        let mut state = ResumeState::new(
            TaskSource::new(),
            input_task,
            vec![TaskSource::new()],
            vec![schema.clone()],
            TaskSource::new(),
            schema.clone(),
            schema,
            2,
        );
        let mut report = TaskReport::new();
        report.set("records", 10);
        state.record_partition(0, report.clone(), report);
        state
    }

    #[test]
    fn resume_state_roundtrip() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(backend.load_resume_state(&pid("p")).unwrap().is_none());

        let state = resume_state();
        backend.save_resume_state(&pid("p"), &state).unwrap();
        let loaded = backend.load_resume_state(&pid("p")).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.pending_partitions(), vec![1]);
    }

    #[test]
    fn resume_state_upsert_and_clear() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let mut state = resume_state();
        backend.save_resume_state(&pid("p"), &state).unwrap();
        state.record_partition(1, TaskReport::new(), TaskReport::new());
        backend.save_resume_state(&pid("p"), &state).unwrap();
        assert!(backend.load_resume_state(&pid("p")).unwrap().unwrap().is_complete());

        assert!(backend.clear_resume_state(&pid("p")).unwrap());
        assert!(!backend.clear_resume_state(&pid("p")).unwrap());
        assert!(backend.load_resume_state(&pid("p")).unwrap().is_none());
    }

    #[test]
    fn pipelines_are_isolated() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.save_resume_state(&pid("a"), &resume_state()).unwrap();
        assert!(backend.load_resume_state(&pid("b")).unwrap().is_none());
    }

    #[test]
    fn next_config_roundtrip() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let config = serde_json::json!({"in": {"type": "inline", "last_id": 42}});
        backend.save_next_config(&pid("p"), &config).unwrap();
        assert_eq!(backend.load_next_config(&pid("p")).unwrap(), Some(config));
    }

    #[test]
    fn run_lifecycle() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let first = backend.start_run(&pid("p")).unwrap();
        backend
            .complete_run(
                first,
                RunStatus::Partial,
                &RunStats {
                    partitions: 4,
                    partitions_failed: 1,
                    records: 300,
                    error_message: Some("partition 2 failed".into()),
                },
            )
            .unwrap();
        let second = backend.start_run(&pid("p")).unwrap();
        assert!(second > first);

        let runs = backend.list_runs(&pid("p"), 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert!(runs[0].finished_at.is_none());
        assert_eq!(runs[1].status, RunStatus::Partial);
        assert_eq!(runs[1].stats.records, 300);
        assert_eq!(runs[1].stats.error_message.as_deref(), Some("partition 2 failed"));
        assert!(runs[1].started_at.ends_with('Z'));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let backend = SqliteStateBackend::open(&path).unwrap();
            backend.save_resume_state(&pid("p"), &resume_state()).unwrap();
        }
        let reopened = SqliteStateBackend::open(&path).unwrap();
        assert!(reopened.load_resume_state(&pid("p")).unwrap().is_some());
    }
}
