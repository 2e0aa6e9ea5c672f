//! Persistence bridge
//!
//! Mirrors in-memory session mutations into SQLite and replays them at
//! startup. A single writer thread owns the connection and applies queued
//! operations in submission order. Mirroring is fire-and-forget: a failed
//! write is logged and counted, and never reaches the in-memory state or
//! the stream that caused it.
//!
//! ```text
//! engine --mirror_*()--> queue --> writer thread --> SqliteStorage
//! engine <--bootstrap()-- oneshot <-- writer thread <-- load_sessions
//! ```

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::chunk::ChunkType;
use crate::error::{Result, TurnstreamError};
use crate::metrics;
use crate::session::types::{
    EventType, LogLevel, Session, SessionEvent, SessionStatus, SessionTarget, TargetType,
};
use crate::storage::{EventRow, SessionRow, SqliteStorage, TelemetryDelta, TelemetryRow};

/// Default number of most recent events replayed per session
pub const DEFAULT_BOOTSTRAP_EVENT_LIMIT: usize = 500;

type LoadedRows = Vec<(SessionRow, Vec<EventRow>)>;

enum WriteOp {
    UpsertSession(SessionRow),
    AppendEvent {
        row: EventRow,
        chunks: u64,
        errors: u64,
        stream_id: Option<String>,
    },
    ClearEvents(String),
    DeleteSession(String),
    Load {
        event_limit: usize,
        reply: oneshot::Sender<Result<LoadedRows>>,
    },
    Telemetry {
        session_id: String,
        reply: oneshot::Sender<Result<Option<TelemetryRow>>>,
    },
    Flush(oneshot::Sender<()>),
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::UpsertSession(_) => "upsert_session",
            WriteOp::AppendEvent { .. } => "append_event",
            WriteOp::ClearEvents(_) => "clear_events",
            WriteOp::DeleteSession(_) => "delete_session",
            WriteOp::Load { .. } => "load",
            WriteOp::Telemetry { .. } => "telemetry",
            WriteOp::Flush(_) => "flush",
        }
    }
}

/// Handle to the persistence writer
#[derive(Debug)]
pub struct PersistenceBridge {
    queue: Option<mpsc::UnboundedSender<WriteOp>>,
    writer: Option<JoinHandle<()>>,
    db_path: PathBuf,
    event_limit: usize,
}

impl PersistenceBridge {
    /// Open the database and start the writer thread.
    ///
    /// `db_path` of `None` uses the default location (see
    /// [`SqliteStorage::new`]).
    pub fn open(db_path: Option<&Path>, event_limit: usize) -> Result<Self> {
        let storage = match db_path {
            Some(path) => SqliteStorage::new_with_path(path)?,
            None => SqliteStorage::new()?,
        };
        let db_path = storage.db_path().to_path_buf();

        let (queue, rx) = mpsc::unbounded_channel();
        let writer = std::thread::Builder::new()
            .name("turnstream-writer".to_string())
            .spawn(move || run_writer(storage, rx))
            .map_err(|e| TurnstreamError::Persistence(format!("Failed to start writer: {}", e)))?;

        tracing::info!("Persistence writer started for {}", db_path.display());

        Ok(Self {
            queue: Some(queue),
            writer: Some(writer),
            db_path,
            event_limit: event_limit.max(1),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Replay persisted sessions.
    ///
    /// Each session comes back with its most recent events (up to the
    /// configured limit) in chronological order. A persisted `streaming`
    /// status comes back as `idle`: no stream survives a restart.
    ///
    /// # Examples
    ///
    /// ```
    /// use turnstream::persistence::PersistenceBridge;
    ///
    /// # tokio_test::block_on(async {
    /// let dir = tempfile::tempdir().unwrap();
    /// let bridge = PersistenceBridge::open(Some(dir.path().join("s.db").as_path()), 500).unwrap();
    /// assert!(bridge.bootstrap().await.unwrap().is_empty());
    /// bridge.shutdown();
    /// # });
    /// ```
    pub async fn bootstrap(&self) -> Result<Vec<Session>> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(WriteOp::Load {
            event_limit: self.event_limit,
            reply,
        })?;
        let rows = rx
            .await
            .map_err(|_| TurnstreamError::Persistence("writer stopped during bootstrap".to_string()))??;

        let sessions: Vec<Session> = rows
            .into_iter()
            .filter_map(|(session, events)| session_from_rows(session, events))
            .collect();
        tracing::info!(
            "Bootstrapped {} session(s) from {}",
            sessions.len(),
            self.db_path.display()
        );
        Ok(sessions)
    }

    pub async fn telemetry(&self, session_id: &str) -> Result<Option<TelemetryRow>> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(WriteOp::Telemetry {
            session_id: session_id.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| TurnstreamError::Persistence("writer stopped".to_string()))?
    }

    /// Queue an upsert of the session row (name, target, status).
    pub fn mirror_session(&self, session: &Session) {
        self.submit(WriteOp::UpsertSession(session_row(session)));
    }

    /// Queue an append of one event.
    pub fn mirror_event(&self, session_id: &str, event: &SessionEvent) {
        let (chunks, errors) = telemetry_counts(event);
        self.submit(WriteOp::AppendEvent {
            row: event_row(session_id, event),
            chunks,
            errors,
            stream_id: event
                .payload
                .get("streamId")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    pub fn clear_session_events(&self, session_id: &str) {
        self.submit(WriteOp::ClearEvents(session_id.to_string()));
    }

    /// Queue removal of the session, its events and telemetry.
    pub fn delete_session(&self, session_id: &str) {
        self.submit(WriteOp::DeleteSession(session_id.to_string()));
    }

    /// Wait until every previously queued write has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.enqueue(WriteOp::Flush(done))?;
        rx.await
            .map_err(|_| TurnstreamError::Persistence("writer stopped before flush".to_string()).into())
    }

    /// Drain the queue and stop the writer thread.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.queue.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::error!("Persistence writer panicked");
            }
        }
    }

    fn submit(&self, op: WriteOp) {
        let name = op.name();
        if let Err(e) = self.enqueue(op) {
            tracing::warn!("Dropping {} write: {}", name, e);
            metrics::record_persistence_failure(name);
        }
    }

    fn enqueue(&self, op: WriteOp) -> Result<()> {
        self.queue
            .as_ref()
            .ok_or_else(|| TurnstreamError::Persistence("writer is shut down".to_string()))?
            .send(op)
            .map_err(|_| TurnstreamError::Persistence("writer is not running".to_string()).into())
    }
}

impl Drop for PersistenceBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_writer(mut storage: SqliteStorage, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.blocking_recv() {
        let name = op.name();
        let outcome = match op {
            WriteOp::UpsertSession(row) => storage.upsert_session(&row),
            WriteOp::AppendEvent {
                row,
                chunks,
                errors,
                stream_id,
            } => storage
                .append_event(
                    &row,
                    TelemetryDelta {
                        chunks,
                        errors,
                        stream_id: stream_id.as_deref(),
                    },
                )
                .map(|inserted| {
                    if !inserted {
                        tracing::debug!("Event {} already stored", row.event_id);
                    }
                }),
            WriteOp::ClearEvents(session_id) => storage.clear_session_events(&session_id),
            WriteOp::DeleteSession(session_id) => storage.delete_session(&session_id),
            WriteOp::Load { event_limit, reply } => {
                let _ = reply.send(storage.load_sessions(event_limit));
                Ok(())
            }
            WriteOp::Telemetry { session_id, reply } => {
                let _ = reply.send(storage.telemetry(&session_id));
                Ok(())
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = outcome {
            tracing::warn!("Persistence {} failed: {:#}", name, e);
            metrics::record_persistence_failure(name);
        }
    }
    tracing::debug!("Persistence writer stopped");
}

pub(crate) fn session_row(session: &Session) -> SessionRow {
    SessionRow {
        id: session.id.clone(),
        display_name: session.display_name.clone(),
        target_type: session.target.target_type().as_str().to_string(),
        target_ref: session.target.target_ref().to_string(),
        created_at: session.created_at,
        updated_at: session.updated_at,
        metadata: json!({ "status": session.status.as_str() }),
    }
}

pub(crate) fn event_row(session_id: &str, event: &SessionEvent) -> EventRow {
    EventRow {
        session_id: session_id.to_string(),
        event_id: event.id.clone(),
        kind: event.kind.as_str().to_string(),
        payload: event.payload.clone(),
        timestamp: event.timestamp,
    }
}

fn telemetry_counts(event: &SessionEvent) -> (u64, u64) {
    match event.kind {
        EventType::Chunk(ChunkType::Error) => (1, 1),
        EventType::Chunk(_) => (1, 0),
        EventType::Log => {
            let is_error = event
                .log()
                .map(|log| log.level == Some(LogLevel::Error))
                .unwrap_or(false);
            (0, u64::from(is_error))
        }
    }
}

/// Rebuild a session from stored rows. Rows with an unknown target type
/// are skipped, as are events with an unknown type.
pub(crate) fn session_from_rows(row: SessionRow, events: Vec<EventRow>) -> Option<Session> {
    let Some(target_type) = TargetType::parse(&row.target_type) else {
        tracing::warn!(
            "Skipping stored session {}: unknown target type {:?}",
            row.id,
            row.target_type
        );
        return None;
    };

    let status = match row
        .metadata
        .get("status")
        .and_then(Value::as_str)
        .and_then(SessionStatus::parse)
    {
        Some(SessionStatus::Error) => SessionStatus::Error,
        _ => SessionStatus::Idle,
    };

    let events: Vec<SessionEvent> = events
        .into_iter()
        .filter_map(|event| match EventType::parse(&event.kind) {
            Some(kind) => Some(SessionEvent {
                id: event.event_id,
                timestamp: event.timestamp,
                kind,
                payload: event.payload,
            }),
            None => {
                tracing::warn!(
                    "Skipping stored event {} in {}: unknown type {:?}",
                    event.event_id,
                    row.id,
                    event.kind
                );
                None
            }
        })
        .collect();

    Some(Session {
        id: row.id,
        display_name: row.display_name,
        target: SessionTarget::from_parts(target_type, row.target_ref),
        status,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events,
    })
}
