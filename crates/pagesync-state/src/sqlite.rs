//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use pagesync_types::protocol::StateDocument;
use pagesync_types::record::Rejection;
use pagesync_types::state::{ConnectorId, CursorState, ResourceName, RunStatus, SyncRun};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{RunRecord, StateBackend};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Leases not renewed for this long are considered abandoned by a crashed
/// process. Live runs renew every [`LEASE_RENEW_INTERVAL`](crate::lease::LEASE_RENEW_INTERVAL).
const LEASE_TTL_SECS: i64 = 3600;

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cursor_state (
    connector TEXT NOT NULL,
    resource TEXT NOT NULL,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (connector, resource)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connector TEXT NOT NULL,
    resource TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    rows_emitted INTEGER DEFAULT 0,
    rows_rejected INTEGER DEFAULT 0,
    rows_skipped INTEGER DEFAULT 0,
    pages INTEGER DEFAULT 0,
    start_cursor TEXT,
    end_cursor TEXT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS rejected_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connector TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES sync_runs(id),
    resource TEXT NOT NULL,
    code TEXT NOT NULL,
    field TEXT NOT NULL,
    message TEXT NOT NULL,
    record_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS run_leases (
    connector TEXT NOT NULL,
    resource TEXT NOT NULL,
    owner TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    PRIMARY KEY (connector, resource)
);

CREATE INDEX IF NOT EXISTS idx_rejected_connector_run ON rejected_rows (connector, run_id);
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

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| iso.to_string(),
            |dt| dt.with_timezone(&Utc).format(SQLITE_DATETIME_FMT).to_string(),
        )
    }

    #[cfg(test)]
    fn count_rejections_for_run(&self, connector: &ConnectorId, run_id: i64) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM rejected_rows WHERE connector = ?1 AND run_id = ?2",
            rusqlite::params![connector.as_str(), run_id],
            |row| row.get(0),
        )?)
    }

    #[cfg(test)]
    fn updated_at(&self, connector: &ConnectorId, resource: &ResourceName) -> error::Result<String> {
        let conn = self.lock_conn()?;
        let raw: String = conn.query_row(
            "SELECT updated_at FROM cursor_state WHERE connector = ?1 AND resource = ?2",
            rusqlite::params![connector.as_str(), resource.as_str()],
            |row| row.get(0),
        )?;
        Ok(Self::sqlite_to_iso8601(&raw))
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn parse_status(raw: &str) -> RunStatus {
    match raw {
        "complete" => RunStatus::Complete,
        "failed" => RunStatus::Failed,
        _ => RunStatus::Running,
    }
}

impl StateBackend for SqliteStateBackend {
    fn get_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
    ) -> error::Result<Option<serde_json::Value>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state_json FROM cursor_state WHERE connector = ?1 AND resource = ?2",
                rusqlite::params![connector.as_str(), resource.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| serde_json::from_str(&json).map_err(StateError::from))
            .transpose()
    }

    fn set_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let json = serde_json::to_string(cursor)?;
        let updated_at = cursor
            .checkpointed_at
            .as_deref()
            .map_or_else(Self::now_sqlite, Self::iso8601_to_sqlite);
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO cursor_state (connector, resource, state_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(connector, resource) \
             DO UPDATE SET state_json = ?3, updated_at = ?4",
            rusqlite::params![connector.as_str(), resource.as_str(), json, updated_at],
        )?;
        Ok(())
    }

    fn export_state(&self, connector: &ConnectorId) -> error::Result<StateDocument> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT resource, state_json FROM cursor_state WHERE connector = ?1 ORDER BY resource",
        )?;
        let rows = stmt.query_map([connector.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut doc = StateDocument::new();
        for row in rows {
            let (resource, json) = row?;
            doc.insert(resource, serde_json::from_str(&json)?);
        }
        Ok(doc)
    }

    fn start_run(&self, connector: &ConnectorId, resource: &ResourceName) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (connector, resource, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                connector.as_str(),
                resource.as_str(),
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, run_id: i64, run: &SyncRun) -> error::Result<()> {
        let start_cursor = serde_json::to_string(&run.start_cursor)?;
        let end_cursor = serde_json::to_string(&run.end_cursor)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET status = ?1, finished_at = datetime('now'), \
             rows_emitted = ?2, rows_rejected = ?3, rows_skipped = ?4, pages = ?5, \
             start_cursor = ?6, end_cursor = ?7, error_message = ?8 \
             WHERE id = ?9",
            rusqlite::params![
                run.status.as_str(),
                to_i64(run.rows_emitted),
                to_i64(run.rows_rejected),
                to_i64(run.rows_skipped),
                to_i64(run.pages),
                start_cursor,
                end_cursor,
                run.error.as_ref().map(ToString::to_string),
                run_id,
            ],
        )?;
        Ok(())
    }

    fn list_runs(&self, connector: &ConnectorId, limit: usize) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource, status, rows_emitted, rows_rejected, rows_skipped, error_message \
             FROM sync_runs WHERE connector = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![connector.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                let status: String = row.get(2)?;
                Ok(RunRecord {
                    id: row.get(0)?,
                    resource: row.get(1)?,
                    status: parse_status(&status),
                    rows_emitted: to_u64(row.get(3)?),
                    rows_rejected: to_u64(row.get(4)?),
                    rows_skipped: to_u64(row.get(5)?),
                    error: row.get(6)?,
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StateError::from)
    }

    fn insert_rejections(
        &self,
        connector: &ConnectorId,
        run_id: i64,
        resource: &ResourceName,
        rejections: &[Rejection],
    ) -> error::Result<u64> {
        if rejections.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::context("insert_rejections: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO rejected_rows \
                 (connector, run_id, resource, code, field, message, record_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| StateError::context("insert_rejections: prepare", e))?;

        let mut count = 0u64;
        for rejection in rejections {
            let record_json = serde_json::to_string(&rejection.record)?;
            stmt.execute(rusqlite::params![
                connector.as_str(),
                run_id,
                resource.as_str(),
                rejection.code,
                rejection.field,
                rejection.message,
                record_json,
            ])
            .map_err(|e| StateError::context("insert_rejections: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::context("insert_rejections: commit", e))?;

        Ok(count)
    }

    fn try_acquire_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();

        let expired = conn.execute(
            "DELETE FROM run_leases WHERE connector = ?1 AND resource = ?2 \
             AND acquired_at < datetime(?3, ?4)",
            rusqlite::params![
                connector.as_str(),
                resource.as_str(),
                now,
                format!("-{LEASE_TTL_SECS} seconds")
            ],
        )?;
        if expired > 0 {
            tracing::warn!(resource = %resource, "reclaimed expired run lease");
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO run_leases (connector, resource, owner, acquired_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![connector.as_str(), resource.as_str(), owner, now],
        )?;
        Ok(inserted > 0)
    }

    fn renew_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let renewed = conn.execute(
            "UPDATE run_leases SET acquired_at = ?4 \
             WHERE connector = ?1 AND resource = ?2 AND owner = ?3",
            rusqlite::params![connector.as_str(), resource.as_str(), owner, Self::now_sqlite()],
        )?;
        Ok(renewed > 0)
    }

    fn release_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM run_leases WHERE connector = ?1 AND resource = ?2 AND owner = ?3",
            rusqlite::params![connector.as_str(), resource.as_str(), owner],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesync_types::error::ConnectorError;

    fn cid(name: &str) -> ConnectorId {
        ConnectorId::new(name)
    }

    fn resource(name: &str) -> ResourceName {
        ResourceName::new(name)
    }

    #[test]
    fn cursor_roundtrip() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(backend
            .get_cursor(&cid("c"), &resource("users"))
            .unwrap()
            .is_none());

        let mut cursor = CursorState::initial().with_cursor("2024-01-15T10:00:00Z");
        cursor.checkpointed_at = Some("2024-01-15T10:05:00Z".into());
        backend.set_cursor(&cid("c"), &resource("users"), &cursor).unwrap();

        let stored = backend
            .get_cursor(&cid("c"), &resource("users"))
            .unwrap()
            .unwrap();
        assert_eq!(CursorState::from_value(stored).unwrap(), cursor);
        assert_eq!(
            backend.updated_at(&cid("c"), &resource("users")).unwrap(),
            "2024-01-15T10:05:00Z"
        );
    }

    #[test]
    fn cursor_upsert() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        backend
            .set_cursor(&cid("c"), &users, &CursorState::initial().with_cursor("100"))
            .unwrap();
        backend
            .set_cursor(&cid("c"), &users, &CursorState::initial().with_cursor("200"))
            .unwrap();

        let stored = backend.get_cursor(&cid("c"), &users).unwrap().unwrap();
        assert_eq!(stored["cursor"], "200");
    }

    #[test]
    fn different_connectors_independent() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        backend
            .set_cursor(&cid("a"), &users, &CursorState::initial().with_cursor("aaa"))
            .unwrap();
        backend
            .set_cursor(&cid("b"), &users, &CursorState::initial().with_cursor("bbb"))
            .unwrap();

        let a = backend.export_state(&cid("a")).unwrap();
        let b = backend.export_state(&cid("b")).unwrap();
        assert_eq!(a["users"]["cursor"], "aaa");
        assert_eq!(b["users"]["cursor"], "bbb");
    }

    #[test]
    fn export_is_sorted_by_resource() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        for name in ["posts", "comments", "users"] {
            backend
                .set_cursor(&cid("c"), &resource(name), &CursorState::initial())
                .unwrap();
        }
        let keys: Vec<String> = backend.export_state(&cid("c")).unwrap().into_keys().collect();
        assert_eq!(keys, vec!["comments", "posts", "users"]);
    }

    #[test]
    fn run_lifecycle() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        let run_id = backend.start_run(&cid("c"), &users).unwrap();
        assert!(run_id > 0);

        let mut run = SyncRun::start(users, CursorState::initial());
        run.rows_emitted = 1000;
        run.rows_skipped = 4;
        backend.complete_run(run_id, &run.complete()).unwrap();

        let runs = backend.list_runs(&cid("c"), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Complete);
        assert_eq!(runs[0].rows_emitted, 1000);
        assert_eq!(runs[0].rows_skipped, 4);
    }

    #[test]
    fn run_failure_keeps_error_message() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let posts = resource("posts");
        let run_id = backend.start_run(&cid("c"), &posts).unwrap();
        let run = SyncRun::start(posts, CursorState::initial())
            .fail(ConnectorError::transient_network("CONNECTION_RESET", "Connection reset"));
        backend.complete_run(run_id, &run).unwrap();

        let runs = backend.list_runs(&cid("c"), 10).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("Connection reset"));
    }

    #[test]
    fn multiple_runs_newest_first() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run1 = backend.start_run(&cid("c"), &resource("s")).unwrap();
        let run2 = backend.start_run(&cid("c"), &resource("s")).unwrap();
        assert!(run2 > run1);
        let runs = backend.list_runs(&cid("c"), 1).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run2);
    }

    fn rejection(id: i64) -> Rejection {
        let mut record = serde_json::Map::new();
        record.insert("id".into(), serde_json::json!(id));
        Rejection {
            code: "MISSING_REQUIRED_FIELD".into(),
            field: "user_id".into(),
            message: "required field 'user_id' is missing".into(),
            record,
        }
    }

    #[test]
    fn rejections_insert_and_count() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        let run_id = backend.start_run(&cid("c"), &users).unwrap();

        let count = backend
            .insert_rejections(&cid("c"), run_id, &users, &[rejection(1), rejection(2)])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(backend.count_rejections_for_run(&cid("c"), run_id).unwrap(), 2);
    }

    #[test]
    fn rejections_empty_insert() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let count = backend
            .insert_rejections(&cid("c"), 1, &resource("users"), &[])
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rejections_invalid_run_id_includes_operation_context() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let err = backend
            .insert_rejections(&cid("c"), 999, &resource("users"), &[rejection(1)])
            .expect_err("invalid run id should fail");
        assert!(err.to_string().contains("insert_rejections"));
    }

    #[test]
    fn lease_is_exclusive_per_resource() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(backend.try_acquire_lease(&cid("c"), &resource("users"), "p1").unwrap());
        assert!(!backend.try_acquire_lease(&cid("c"), &resource("users"), "p2").unwrap());
        assert!(backend.try_acquire_lease(&cid("c"), &resource("posts"), "p2").unwrap());

        backend.release_lease(&cid("c"), &resource("users"), "p2").unwrap();
        assert!(!backend.try_acquire_lease(&cid("c"), &resource("users"), "p2").unwrap());
        backend.release_lease(&cid("c"), &resource("users"), "p1").unwrap();
        assert!(backend.try_acquire_lease(&cid("c"), &resource("users"), "p2").unwrap());
    }

    #[test]
    fn expired_lease_is_reclaimed() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        {
            let conn = backend.lock_conn().unwrap();
            conn.execute(
                "INSERT INTO run_leases (connector, resource, owner, acquired_at) \
                 VALUES ('c', 'users', 'crashed', '2000-01-01 00:00:00')",
                [],
            )
            .unwrap();
        }
        assert!(backend.try_acquire_lease(&cid("c"), &resource("users"), "p1").unwrap());
    }

    fn age_lease(backend: &SqliteStateBackend, owner: &str, secs: i64) {
        let conn = backend.lock_conn().unwrap();
        conn.execute(
            "UPDATE run_leases SET acquired_at = datetime(acquired_at, ?2) WHERE owner = ?1",
            rusqlite::params![owner, format!("-{secs} seconds")],
        )
        .unwrap();
    }

    #[test]
    fn renewed_lease_outlives_the_ttl() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        assert!(backend.try_acquire_lease(&cid("c"), &users, "live-run").unwrap());

        age_lease(&backend, "live-run", LEASE_TTL_SECS + 60);
        assert!(backend.renew_lease(&cid("c"), &users, "live-run").unwrap());
        age_lease(&backend, "live-run", LEASE_TTL_SECS - 60);

        assert!(
            !backend.try_acquire_lease(&cid("c"), &users, "second-run").unwrap(),
            "second writer admitted while the first run holds the resource"
        );
    }

    #[test]
    fn reclaimed_lease_cannot_be_renewed_by_its_old_owner() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let users = resource("users");
        assert!(backend.try_acquire_lease(&cid("c"), &users, "stalled").unwrap());
        age_lease(&backend, "stalled", LEASE_TTL_SECS + 60);

        assert!(backend.try_acquire_lease(&cid("c"), &users, "next").unwrap());
        assert!(!backend.renew_lease(&cid("c"), &users, "stalled").unwrap());
        assert!(backend.renew_lease(&cid("c"), &users, "next").unwrap());
    }

    #[test]
    fn file_backed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let backend = SqliteStateBackend::open(&path).unwrap();
            backend
                .set_cursor(&cid("c"), &resource("users"), &CursorState::initial().with_cursor("t3_x"))
                .unwrap();
        }
        let backend = SqliteStateBackend::open(&path).unwrap();
        let stored = backend.get_cursor(&cid("c"), &resource("users")).unwrap().unwrap();
        assert_eq!(stored["cursor"], "t3_x");
    }

    #[test]
    fn sqlite_to_iso8601_conversion() {
        let iso = SqliteStateBackend::sqlite_to_iso8601("2024-01-15 10:00:00");
        assert_eq!(iso, "2024-01-15T10:00:00Z");
    }

    #[test]
    fn iso8601_to_sqlite_conversion() {
        let sqlite = SqliteStateBackend::iso8601_to_sqlite("2024-01-15T10:00:00Z");
        assert_eq!(sqlite, "2024-01-15 10:00:00");
    }
}
