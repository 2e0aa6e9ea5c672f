use crate::error::{Result, TurnstreamError};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod types;
pub use types::{EventRow, SessionRow, TelemetryDelta, TelemetryRow};

/// Environment variable overriding the database location
pub const DB_PATH_ENV: &str = "TURNSTREAM_DB";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite store for sessions, their events, and per-session telemetry
///
/// Owns a single connection; callers serialize access (the persistence
/// writer thread is the only user at runtime).
pub struct SqliteStorage {
    db_path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteStorage {
    /// Open the default database
    ///
    /// Uses `TURNSTREAM_DB` when set, otherwise `sessions.db` in the user's
    /// data directory.
    pub fn new() -> Result<Self> {
        Self::new_with_path(default_db_path()?)
    }

    /// Open (or create) the database at `db_path`.
    ///
    /// # Examples
    ///
    /// ```
    /// use turnstream::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("sessions.db")).unwrap();
    /// assert!(storage.load_sessions(10).unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create parent directory for database")
                    .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)
            .context("Failed to open database")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let storage = Self { db_path, conn };
        storage.init()?;
        Ok(storage)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Initialize pragmas and schema
    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("Failed to enable WAL")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        tracing::debug!("Opened {} (journal_mode={})", self.db_path.display(), mode);

        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    target_type TEXT NOT NULL,
                    target_ref TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    metadata JSON NOT NULL DEFAULT '{}'
                );
                CREATE TABLE IF NOT EXISTS events (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    event_id TEXT NOT NULL,
                    type TEXT NOT NULL,
                    payload JSON NOT NULL,
                    timestamp TEXT NOT NULL,
                    UNIQUE (session_id, event_id)
                );
                CREATE INDEX IF NOT EXISTS idx_events_session ON events (session_id, seq);
                CREATE TABLE IF NOT EXISTS session_telemetry (
                    session_id TEXT PRIMARY KEY,
                    chunk_count INTEGER NOT NULL DEFAULT 0,
                    error_count INTEGER NOT NULL DEFAULT 0,
                    last_stream_id TEXT,
                    updated_at TEXT NOT NULL
                );",
            )
            .context("Failed to create tables")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Insert or update a session row. `created_at` of an existing row is kept.
    pub fn upsert_session(&self, row: &SessionRow) -> Result<()> {
        let metadata = serde_json::to_string(&row.metadata)
            .context("Failed to serialize session metadata")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO sessions (id, display_name, target_type, target_ref, created_at, updated_at, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    target_type = excluded.target_type,
                    target_ref = excluded.target_ref,
                    updated_at = excluded.updated_at,
                    metadata = excluded.metadata",
                params![
                    row.id,
                    row.display_name,
                    row.target_type,
                    row.target_ref,
                    encode_timestamp(&row.created_at),
                    encode_timestamp(&row.updated_at),
                    metadata
                ],
            )
            .context("Failed to upsert session")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Append one event.
    ///
    /// Re-appending an event id already stored for the session is a no-op,
    /// so replaying the same writes leaves the tables unchanged. Returns
    /// whether a row was inserted.
    pub fn append_event(&mut self, row: &EventRow, delta: TelemetryDelta<'_>) -> Result<bool> {
        let payload = serde_json::to_string(&row.payload)
            .context("Failed to serialize event payload")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        let timestamp = encode_timestamp(&row.timestamp);

        let tx = self
            .conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO events (session_id, event_id, type, payload, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.session_id, row.event_id, row.kind, payload, timestamp],
            )
            .context("Failed to insert event")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        if inserted > 0 {
            tx.execute(
                "INSERT INTO session_telemetry (session_id, chunk_count, error_count, last_stream_id, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(session_id) DO UPDATE SET
                    chunk_count = chunk_count + excluded.chunk_count,
                    error_count = error_count + excluded.error_count,
                    last_stream_id = COALESCE(excluded.last_stream_id, last_stream_id),
                    updated_at = excluded.updated_at",
                params![
                    row.session_id,
                    delta.chunks as i64,
                    delta.errors as i64,
                    delta.stream_id,
                    timestamp
                ],
            )
            .context("Failed to update session telemetry")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

            tx.execute(
                "UPDATE sessions SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
                params![timestamp, row.session_id],
            )
            .context("Failed to touch session")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        Ok(inserted > 0)
    }

    /// Remove every event of a session and reset its telemetry.
    pub fn clear_session_events(&mut self, session_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        tx.execute("DELETE FROM events WHERE session_id = ?", params![session_id])
            .context("Failed to clear events")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        tx.execute(
            "DELETE FROM session_telemetry WHERE session_id = ?",
            params![session_id],
        )
        .context("Failed to reset session telemetry")
        .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Delete a session with its events and telemetry, atomically.
    ///
    /// Deleting an unknown session is not an error.
    pub fn delete_session(&mut self, session_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        tx.execute("DELETE FROM events WHERE session_id = ?", params![session_id])
            .context("Failed to delete events")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        tx.execute(
            "DELETE FROM session_telemetry WHERE session_id = ?",
            params![session_id],
        )
        .context("Failed to delete session telemetry")
        .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        tx.execute("DELETE FROM sessions WHERE id = ?", params![session_id])
            .context("Failed to delete session")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Load every session with at most `event_limit` of its most recent
    /// events, oldest first. Sessions come back most recently updated first.
    pub fn load_sessions(&self, event_limit: usize) -> Result<Vec<(SessionRow, Vec<EventRow>)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, display_name, target_type, target_ref, created_at, updated_at, metadata
                FROM sessions
                ORDER BY updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let rows = stmt
            .query_map([], session_from_row)
            .context("Failed to query sessions")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            match row {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping unreadable session row: {}", e),
            }
        }

        let mut loaded = Vec::with_capacity(sessions.len());
        for session in sessions {
            let events = self.recent_events(&session.id, event_limit)?;
            loaded.push((session, events));
        }
        Ok(loaded)
    }

    /// The `limit` most recent events of a session, oldest first.
    pub fn recent_events(&self, session_id: &str, limit: usize) -> Result<Vec<EventRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, event_id, type, payload, timestamp
                FROM events
                WHERE session_id = ?1
                ORDER BY seq DESC
                LIMIT ?2",
            )
            .context("Failed to prepare statement")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![session_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                event_from_row,
            )
            .context("Failed to query events")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            match row {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping unreadable event row in {}: {}", session_id, e),
            }
        }
        events.reverse();
        Ok(events)
    }

    pub fn telemetry(&self, session_id: &str) -> Result<Option<TelemetryRow>> {
        self.conn
            .query_row(
                "SELECT session_id, chunk_count, error_count, last_stream_id, updated_at
                FROM session_telemetry WHERE session_id = ?",
                params![session_id],
                |row| {
                    let chunk_count: i64 = row.get(1)?;
                    let error_count: i64 = row.get(2)?;
                    let updated_at: String = row.get(4)?;
                    Ok(TelemetryRow {
                        session_id: row.get(0)?,
                        chunk_count: chunk_count.max(0) as u64,
                        error_count: error_count.max(0) as u64,
                        last_stream_id: row.get(3)?,
                        updated_at: decode_timestamp(&updated_at),
                    })
                },
            )
            .optional()
            .context("Failed to query session telemetry")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()).into())
    }

    pub fn count_events(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM events WHERE session_id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .context("Failed to count events")
            .map_err(|e| TurnstreamError::Persistence(e.to_string()))?;
        Ok(count.max(0) as usize)
    }
}

fn default_db_path() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DB_PATH_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    let proj_dirs = ProjectDirs::from("com", "turnstream", "turnstream")
        .ok_or_else(|| TurnstreamError::Persistence("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("sessions.db"))
}

/// Fixed-width UTC form, so text order matches time order.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!("Unparseable stored timestamp {:?}; using now", value);
            Utc::now()
        })
}

fn parse_json_column(index: usize, text: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    let metadata: String = row.get(6)?;
    Ok(SessionRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        target_type: row.get(2)?,
        target_ref: row.get(3)?,
        created_at: decode_timestamp(&created_at),
        updated_at: decode_timestamp(&updated_at),
        metadata: parse_json_column(6, &metadata)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let payload: String = row.get(3)?;
    let timestamp: String = row.get(4)?;
    Ok(EventRow {
        session_id: row.get(0)?,
        event_id: row.get(1)?,
        kind: row.get(2)?,
        payload: parse_json_column(3, &payload)?,
        timestamp: decode_timestamp(&timestamp),
    })
}
