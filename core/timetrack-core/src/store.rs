//! SQLite persistence for tracked sessions.
//!
//! The `time_entries` table is the only authority on whether a session is open. Every
//! process opens its own connection; all writes that open, close or edit the open row are
//! single conditional statements so that the "at most one row with `end_time IS NULL`"
//! invariant holds under concurrent writers without any multi-statement transaction.

use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::activities::DEFAULT_ACTIVITY;
use crate::error::{Result, TrackerError};
use crate::timestamp::StoredTime;

/// Project labels with this prefix are archived and hidden from project pickers.
pub const HIDDEN_PROJECT_PREFIX: &str = "[HIDDEN]";

const BUSY_TIMEOUT_MS: i64 = 5000;

/// One row of `time_entries`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: i64,
    pub project: Option<String>,
    pub activity: Option<String>,
    pub start_time: Option<StoredTime>,
    pub end_time: Option<StoredTime>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// The open row, normalized for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OpenSession {
    pub id: i64,
    pub project: String,
    pub activity: String,
    pub start_time: i64,
}

/// Field edits applied to the open row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub project: Option<String>,
    pub activity: Option<String>,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Opens (creating if needed) the store at `path` and applies additive migrations.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts a new open row. Fails with `Conflict` when another row is already open.
    ///
    /// The existence check and the insert are one statement, so two processes racing to
    /// start cannot both succeed.
    pub fn open_session(&self, project: &str, activity: &str, start_time: i64) -> Result<i64> {
        self.with_write(|tx| {
            let inserted = tx
                .execute(
                    "INSERT INTO time_entries (project, activity, start_time) \
                     SELECT ?1, ?2, ?3 \
                     WHERE NOT EXISTS (SELECT 1 FROM time_entries WHERE end_time IS NULL)",
                    params![project, activity, start_time],
                )
                .map_err(|err| TrackerError::storage("Failed to insert session", err))?;

            if inserted == 0 {
                let open_id = tx
                    .query_row(
                        "SELECT id FROM time_entries WHERE end_time IS NULL LIMIT 1",
                        [],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()
                    .map_err(|err| TrackerError::storage("Failed to query open session", err))?
                    .unwrap_or_default();
                return Err(TrackerError::Conflict { open_id });
            }

            let id = tx.last_insert_rowid();
            info!(id, project, activity, start_time, "Session opened");
            Ok(id)
        })
    }

    /// Seals the open row. Returns the number of rows sealed (0 when nothing was open).
    pub fn close_open_session(&self, end_time: i64) -> Result<usize> {
        self.with_write(|tx| {
            let sealed = tx
                .execute(
                    "UPDATE time_entries SET end_time = ?1 WHERE end_time IS NULL",
                    params![end_time],
                )
                .map_err(|err| TrackerError::storage("Failed to close session", err))?;
            if sealed > 0 {
                info!(end_time, rows = sealed, "Session closed");
            } else {
                debug!("Close requested with no open session");
            }
            Ok(sealed)
        })
    }

    /// Edits project/activity of the open row. Returns rows affected (0 when none open).
    pub fn mutate_open_session(&self, patch: &SessionPatch) -> Result<usize> {
        if patch.project.is_none() && patch.activity.is_none() {
            return Ok(0);
        }
        self.with_write(|tx| {
            tx.execute(
                "UPDATE time_entries \
                 SET project = COALESCE(?1, project), activity = COALESCE(?2, activity) \
                 WHERE end_time IS NULL",
                params![patch.project, patch.activity],
            )
            .map_err(|err| TrackerError::storage("Failed to update open session", err))
        })
    }

    pub fn get_open_session(&self) -> Result<Option<SessionRecord>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, project, activity, start_time, end_time FROM time_entries \
                 WHERE end_time IS NULL ORDER BY start_time DESC, id DESC LIMIT 1",
                [],
                record_from_row,
            )
            .optional()
            .map_err(|err| TrackerError::storage("Failed to query open session", err))
        })
    }

    /// Distinct non-empty project labels, most recently started first.
    pub fn list_distinct_projects(&self, exclude_hidden: bool) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT project FROM time_entries \
                     WHERE project IS NOT NULL AND TRIM(project) != '' \
                       AND (?1 = 0 OR project NOT LIKE ?2 || '%') \
                     GROUP BY project \
                     ORDER BY MAX(start_time) DESC, project ASC",
                )
                .map_err(|err| TrackerError::storage("Failed to prepare projects query", err))?;

            let rows = stmt
                .query_map(params![exclude_hidden, HIDDEN_PROJECT_PREFIX], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|err| TrackerError::storage("Failed to query projects", err))?;

            let mut projects = Vec::new();
            for row in rows {
                projects.push(
                    row.map_err(|err| TrackerError::storage("Failed to decode project row", err))?,
                );
            }
            Ok(projects)
        })
    }

    pub fn list_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, project, activity, start_time, end_time \
                     FROM time_entries ORDER BY id ASC",
                )
                .map_err(|err| TrackerError::storage("Failed to prepare sessions query", err))?;

            let rows = stmt
                .query_map([], record_from_row)
                .map_err(|err| TrackerError::storage("Failed to query sessions", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(
                    row.map_err(|err| TrackerError::storage("Failed to decode session row", err))?,
                );
            }
            Ok(sessions)
        })
    }

    pub fn count_open_sessions(&self) -> Result<usize> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM time_entries WHERE end_time IS NULL",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count.max(0) as usize)
            .map_err(|err| TrackerError::storage("Failed to count open sessions", err))
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS time_entries (
                    id INTEGER PRIMARY KEY,
                    project TEXT,
                    activity TEXT,
                    start_time INTEGER,
                    end_time INTEGER
                 );
                 CREATE INDEX IF NOT EXISTS idx_time_entries_end_time
                    ON time_entries(end_time);",
            )
            .map_err(|err| TrackerError::storage("Failed to initialize schema", err))?;
            ensure_time_entries_columns(conn)
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.connect()?;
        op(&mut conn)
    }

    /// Runs one write statement under an IMMEDIATE transaction so the write lock is
    /// taken (waiting on `busy_timeout`) before the statement reads anything.
    fn with_write<T>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| TrackerError::storage("Failed to begin write", err))?;
            let value = op(&tx)?;
            tx.commit()
                .map_err(|err| TrackerError::storage("Failed to commit write", err))?;
            Ok(value)
        })
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| TrackerError::io("Failed to create data folder", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| TrackerError::storage("Failed to open sqlite db", err))?;

        // Rollback journal (no WAL): the data folder may live in a synced directory.
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(|err| TrackerError::storage("Failed to set busy_timeout", err))?;

        Ok(conn)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        project: row.get(1)?,
        activity: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
    })
}

/// Additive migrations. Each is a no-op when the column already exists.
fn ensure_time_entries_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(time_entries)")
        .map_err(|err| TrackerError::storage("Failed to read time_entries schema", err))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|err| TrackerError::storage("Failed to read time_entries schema rows", err))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.map_err(|err| TrackerError::storage("Failed to decode schema row", err))?);
    }

    if !columns.iter().any(|name| name == "activity") {
        conn.execute("ALTER TABLE time_entries ADD COLUMN activity TEXT", [])
            .map_err(|err| TrackerError::storage("Failed to add activity column", err))?;
        info!("Migrated time_entries: added activity column");
    }

    Ok(())
}

/// Normalizes the open row for the synchronizer. Text-encoded start times are resolved
/// in the local time zone.
pub fn to_open_session(record: &SessionRecord) -> Result<OpenSession> {
    let start_time = match &record.start_time {
        Some(stored) => stored.to_epoch(&chrono::Local)?,
        None => {
            return Err(TrackerError::Parse {
                value: String::new(),
                reason: format!("open session {} has no start_time", record.id),
            })
        }
    };

    Ok(OpenSession {
        id: record.id,
        project: record.project.clone().unwrap_or_default(),
        activity: record
            .activity
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()),
        start_time,
    })
}
