//! Session engine
//!
//! [`SessionEngine`] wires the components together and is the single writer
//! of session state:
//!
//! ```text
//! submit() -> ConcurrencyGuard::acquire -> StreamSession::open
//!                                              |
//!               updates channel <--------------+  (chunks, done, failed)
//!                     |
//! next_update() -> SessionStore::append_event -> PersistenceBridge::mirror_*
//! ```
//!
//! Stream tasks never touch the store. They send tagged messages, and the
//! engine applies them one at a time in [`SessionEngine::next_update`].
//! Messages from a stream that has been cancelled or replaced are dropped by
//! ticket, so nothing in flight at cancel time is ever applied.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chunk::{Chunk, ChunkBody};
use crate::error::{Result, TurnstreamError};
use crate::persistence::PersistenceBridge;
use crate::session::interchange::SessionDocument;
use crate::session::store::SessionStore;
use crate::session::types::{
    AgencyDefinition, EventType, LogPayload, PersonaSummary, Session, SessionEvent,
    SessionStatus, SessionTarget,
};
use crate::stream::guard::{ConcurrencyGuard, SlotKey, SlotTicket};
use crate::stream::request::{AgencyRequest, ChatMessage, TurnRequest, WorkflowRequest};
use crate::stream::session::{StreamMessage, StreamSession, StreamSignal};
use crate::stream::transport::ChunkTransport;
use crate::turn::{Timeline, Turn};

const DEFAULT_DISPLAY_NAME: &str = "New session";

/// Who a submission talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitTarget {
    Persona {
        persona_id: String,
    },
    /// One seat of an agency; other seats keep streaming
    AgencySeat {
        agency_id: String,
        seat_id: String,
        /// Overrides the goal of the registered agency definition
        goal: Option<String>,
    },
}

impl SubmitTarget {
    fn session_target(&self) -> SessionTarget {
        match self {
            SubmitTarget::Persona { persona_id } => SessionTarget::persona(persona_id.clone()),
            SubmitTarget::AgencySeat { agency_id, .. } => SessionTarget::agency(agency_id.clone()),
        }
    }

    fn slot_key(&self, session_id: &str) -> SlotKey {
        match self {
            SubmitTarget::Persona { .. } => SlotKey::persona(session_id),
            SubmitTarget::AgencySeat {
                agency_id, seat_id, ..
            } => SlotKey::seat(agency_id.clone(), seat_id.clone()),
        }
    }
}

/// A request to start one turn
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Existing session to continue; a new id is generated when absent
    pub session_id: Option<String>,
    /// Name for a newly created session
    pub display_name: Option<String>,
    pub target: SubmitTarget,
    pub messages: Vec<ChatMessage>,
    pub workflow_request: Option<WorkflowRequest>,
}

impl Submission {
    /// Single user message to a persona, in a new session.
    pub fn persona(persona_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            display_name: None,
            target: SubmitTarget::Persona {
                persona_id: persona_id.into(),
            },
            messages: vec![ChatMessage::user(message)],
            workflow_request: None,
        }
    }

    /// Single user message to one agency seat, in a new session.
    pub fn agency_seat(
        agency_id: impl Into<String>,
        seat_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: None,
            display_name: None,
            target: SubmitTarget::AgencySeat {
                agency_id: agency_id.into(),
                seat_id: seat_id.into(),
                goal: None,
            },
            messages: vec![ChatMessage::user(message)],
            workflow_request: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub session_id: String,
    pub ticket: SlotTicket,
}

/// A state change applied by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    /// A chunk was appended to the session as `event`
    Chunk {
        session_id: String,
        ticket: SlotTicket,
        chunk: Chunk,
        event: SessionEvent,
    },
    /// The stream closed normally and released its slot
    StreamClosed {
        session_id: String,
        ticket: SlotTicket,
    },
    /// The stream failed; an error log event was appended
    StreamFailed {
        session_id: String,
        ticket: SlotTicket,
        message: String,
    },
}

impl EngineUpdate {
    pub fn session_id(&self) -> &str {
        match self {
            EngineUpdate::Chunk { session_id, .. }
            | EngineUpdate::StreamClosed { session_id, .. }
            | EngineUpdate::StreamFailed { session_id, .. } => session_id,
        }
    }

    pub fn ticket(&self) -> &SlotTicket {
        match self {
            EngineUpdate::Chunk { ticket, .. }
            | EngineUpdate::StreamClosed { ticket, .. }
            | EngineUpdate::StreamFailed { ticket, .. } => ticket,
        }
    }
}

/// Non-streaming answer for one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub id: String,
    pub role: String,
    pub content: String,
    /// Unix seconds
    pub created: i64,
}

/// Engine tuning
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Fail a stream that stays silent this long; `None` waits forever
    pub idle_timeout: Option<Duration>,
}

/// Orchestrates submissions, streams, the session store and persistence
pub struct SessionEngine {
    store: SessionStore,
    guard: ConcurrencyGuard,
    streams: HashMap<SlotKey, StreamSession>,
    failed_sessions: HashSet<String>,
    persistence: Option<PersistenceBridge>,
    transport: Arc<dyn ChunkTransport>,
    updates_tx: mpsc::UnboundedSender<StreamMessage>,
    updates_rx: mpsc::UnboundedReceiver<StreamMessage>,
    options: EngineOptions,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("sessions", &self.store.len())
            .field("streams", &self.streams.len())
            .field("persistence", &self.persistence)
            .field("transport", &self.transport)
            .finish()
    }
}

impl SessionEngine {
    /// Create an engine with an empty store.
    ///
    /// Call [`SessionEngine::bootstrap`] to load persisted sessions.
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        persistence: Option<PersistenceBridge>,
        options: EngineOptions,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            store: SessionStore::new(),
            guard: ConcurrencyGuard::new(),
            streams: HashMap::new(),
            failed_sessions: HashSet::new(),
            persistence,
            transport,
            updates_tx,
            updates_rx,
            options,
        }
    }

    /// Replace the store's sessions with the persisted ones. Returns how many
    /// were loaded.
    pub async fn bootstrap(&mut self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let sessions = persistence.bootstrap().await?;
        let count = sessions.len();
        self.store.adopt(sessions);
        Ok(count)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn persistence(&self) -> Option<&PersistenceBridge> {
        self.persistence.as_ref()
    }

    pub fn register_persona(&mut self, persona: PersonaSummary) {
        self.store.upsert_persona(persona);
    }

    pub fn register_agency(&mut self, agency: AgencyDefinition) {
        self.store.upsert_agency(agency);
    }

    /// Start a turn.
    ///
    /// A stream already holding the same slot (same persona session, or same
    /// agency seat) is cancelled and released first, so submitting while
    /// streaming restarts rather than queues. Other seats of an agency are
    /// left alone.
    ///
    /// # Errors
    ///
    /// [`TurnstreamError::InvalidSubmission`] when `session_id` names a
    /// session with a different target, and
    /// [`TurnstreamError::AlreadyStreaming`] if the slot cannot be taken.
    /// Both are returned before any connection is attempted.
    pub fn submit(&mut self, submission: Submission) -> Result<Submitted> {
        let session_id = submission
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let target = submission.target.session_target();

        if let Some(existing) = self.store.get(&session_id) {
            if existing.target != target {
                return Err(TurnstreamError::InvalidSubmission(format!(
                    "session {} targets {} {}, not {} {}",
                    session_id,
                    existing.target.target_type().as_str(),
                    existing.target.target_ref(),
                    target.target_type().as_str(),
                    target.target_ref()
                ))
                .into());
            }
        }

        let key = submission.target.slot_key(&session_id);
        if let Some(previous) = self.streams.remove(&key) {
            tracing::info!("Restarting {}: cancelling ticket {}", key, previous.ticket().id);
            previous.cancel();
            self.guard.release(previous.ticket());
            let previous_session = previous.session_id().to_string();
            if previous_session != session_id {
                self.refresh_status(&previous_session);
            }
        }

        let ticket = self.guard.acquire(key)?;

        let display_name = submission
            .display_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        let (_, created) = self.store.ensure_session(&session_id, &display_name, target);
        if created {
            tracing::info!("Created session {}", session_id);
        }
        self.failed_sessions.remove(&session_id);
        self.set_status(&session_id, SessionStatus::Streaming);

        let request = self.turn_request(&session_id, submission);
        let stream = StreamSession::open(
            ticket.clone(),
            session_id.clone(),
            request,
            Arc::clone(&self.transport),
            self.updates_tx.clone(),
            self.options.idle_timeout,
        );
        self.streams.insert(ticket.key.clone(), stream);

        Ok(Submitted { session_id, ticket })
    }

    fn turn_request(&self, session_id: &str, submission: Submission) -> TurnRequest {
        let (persona_id, agency_request) = match submission.target {
            SubmitTarget::Persona { persona_id } => (Some(persona_id), None),
            SubmitTarget::AgencySeat {
                agency_id,
                seat_id,
                goal,
            } => {
                let definition = self.store.agency(&agency_id);
                let persona_id = definition.and_then(|agency| {
                    agency
                        .participants
                        .iter()
                        .find(|p| p.role_id == seat_id)
                        .map(|p| p.persona_id.clone())
                });
                let request = AgencyRequest {
                    goal: goal.or_else(|| definition.map(|agency| agency.goal.clone())),
                    participants: definition
                        .map(|agency| agency.participants.clone())
                        .unwrap_or_default(),
                    workflow_id: definition.and_then(|agency| agency.workflow_id.clone()),
                    agency_id,
                    seat_id,
                };
                (persona_id, Some(request))
            }
        };

        TurnRequest {
            session_id: session_id.to_string(),
            persona_id,
            agency_request,
            messages: submission.messages,
            workflow_request: submission.workflow_request,
        }
    }

    /// Wait for the next stream message and apply it.
    ///
    /// Returns `None` only when no stream is running and none can send.
    pub async fn next_update(&mut self) -> Option<EngineUpdate> {
        loop {
            if self.streams.is_empty() {
                // Drain anything already queued without blocking.
                let message = self.updates_rx.try_recv().ok()?;
                if let Some(update) = self.process(message) {
                    return Some(update);
                }
                continue;
            }
            let message = self.updates_rx.recv().await?;
            if let Some(update) = self.process(message) {
                return Some(update);
            }
        }
    }

    /// Apply one stream message. Messages from stale tickets are dropped.
    pub fn process(&mut self, message: StreamMessage) -> Option<EngineUpdate> {
        let current = self
            .streams
            .get(&message.ticket.key)
            .map(|stream| stream.ticket().id);
        if current != Some(message.ticket.id) {
            tracing::debug!(
                "Dropping message from stale ticket {} on {}",
                message.ticket.id,
                message.ticket.key
            );
            return None;
        }

        let StreamMessage {
            ticket,
            session_id,
            signal,
        } = message;

        match signal {
            StreamSignal::Chunk(mut chunk) => {
                if let Some(stream) = self.streams.get_mut(&ticket.key) {
                    stream.attribute(&mut chunk);
                }
                let event = match self.store.append_event(
                    &session_id,
                    EventType::Chunk(chunk.chunk_type()),
                    chunk.to_value(),
                ) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("Dropping chunk for {}: {}", session_id, e);
                        return None;
                    }
                };
                if let Some(persistence) = &self.persistence {
                    persistence.mirror_event(&session_id, &event);
                }

                match &chunk.body {
                    ChunkBody::AgencyUpdate { agency } => {
                        self.store.apply_agency_snapshot(agency.clone());
                    }
                    ChunkBody::WorkflowUpdate { workflow } => {
                        self.store.apply_workflow_snapshot(workflow.clone());
                    }
                    _ => {}
                }

                Some(EngineUpdate::Chunk {
                    session_id,
                    ticket,
                    chunk,
                    event,
                })
            }
            StreamSignal::Done => {
                self.finish_stream(&ticket);
                tracing::info!("Stream for {} finished", ticket.key);
                self.refresh_status(&session_id);
                Some(EngineUpdate::StreamClosed { session_id, ticket })
            }
            StreamSignal::Failed(message) => {
                self.finish_stream(&ticket);
                tracing::error!("Stream for {} failed: {}", ticket.key, message);
                self.append_log(&session_id, LogPayload::error(format!("Stream error: {}", message)));
                self.failed_sessions.insert(session_id.clone());
                self.refresh_status(&session_id);
                Some(EngineUpdate::StreamFailed {
                    session_id,
                    ticket,
                    message,
                })
            }
        }
    }

    fn finish_stream(&mut self, ticket: &SlotTicket) {
        // The task has already sent its last message; dropping the handle
        // only reaps it.
        self.streams.remove(&ticket.key);
        self.guard.release(ticket);
    }

    /// Status follows the slots: streaming while any stream of the session
    /// is live, else error if its last failure is unresolved, else idle.
    fn refresh_status(&mut self, session_id: &str) {
        let status = if self.streams.values().any(|s| s.session_id() == session_id) {
            SessionStatus::Streaming
        } else if self.failed_sessions.contains(session_id) {
            SessionStatus::Error
        } else {
            SessionStatus::Idle
        };
        if self.store.get(session_id).map(|s| s.status) != Some(status) {
            self.set_status(session_id, status);
        }
    }

    fn set_status(&mut self, session_id: &str, status: SessionStatus) {
        match self.store.set_status(session_id, status) {
            Ok(session) => self.mirror_session(&session),
            Err(e) => tracing::debug!("Status change skipped: {}", e),
        }
    }

    fn append_log(&mut self, session_id: &str, log: LogPayload) {
        match self.store.append_log(session_id, &log) {
            Ok(event) => {
                if let Some(persistence) = &self.persistence {
                    persistence.mirror_event(session_id, &event);
                }
            }
            Err(e) => tracing::debug!("Log event skipped: {}", e),
        }
    }

    fn mirror_session(&self, session: &Session) {
        if let Some(persistence) = &self.persistence {
            persistence.mirror_session(session);
        }
    }

    /// Apply updates until no stream is running.
    pub async fn wait_idle(&mut self) {
        while !self.streams.is_empty() {
            if self.next_update().await.is_none() {
                break;
            }
        }
    }

    /// Cancel every stream of a session. Returns whether any was running.
    ///
    /// The transport is closed and the slot released immediately; chunks in
    /// flight are discarded. The session goes back to idle.
    pub fn cancel(&mut self, session_id: &str) -> bool {
        let keys: Vec<SlotKey> = self
            .streams
            .iter()
            .filter(|(_, stream)| stream.session_id() == session_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(stream) = self.streams.remove(key) {
                stream.cancel();
                self.guard.release(stream.ticket());
            }
        }
        if !keys.is_empty() {
            self.failed_sessions.remove(session_id);
            self.refresh_status(session_id);
        }
        !keys.is_empty()
    }

    /// Cancel one slot (a persona session or an agency seat).
    pub fn cancel_slot(&mut self, key: &SlotKey) -> bool {
        let Some(stream) = self.streams.remove(key) else {
            return false;
        };
        stream.cancel();
        self.guard.release(stream.ticket());
        let session_id = stream.session_id().to_string();
        self.refresh_status(&session_id);
        true
    }

    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.streams.values().any(|s| s.session_id() == session_id)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Run one turn to completion and return the aggregated answer.
    ///
    /// Updates for other sessions that arrive meanwhile are applied as usual.
    pub async fn complete(&mut self, submission: Submission) -> Result<AggregatedResponse> {
        let submitted = self.submit(submission)?;
        let mut timeline = Timeline::new();

        loop {
            let update = self.next_update().await.ok_or_else(|| {
                TurnstreamError::Transport("stream ended without closing".to_string())
            })?;
            if update.ticket() != &submitted.ticket {
                continue;
            }
            match update {
                EngineUpdate::Chunk { chunk, event, .. } => timeline.apply_chunk(&event, &chunk),
                EngineUpdate::StreamClosed { .. } => break,
                EngineUpdate::StreamFailed { message, .. } => {
                    return Err(TurnstreamError::Transport(message).into());
                }
            }
        }

        let turn: Option<&Turn> = timeline
            .turns()
            .filter(|turn| turn.is_final)
            .last()
            .or_else(|| timeline.turns().last());

        Ok(match turn {
            Some(turn) => AggregatedResponse {
                id: turn.stream_id.clone(),
                role: "assistant".to_string(),
                content: turn.text.clone(),
                created: turn.created_at.timestamp(),
            },
            None => AggregatedResponse {
                id: submitted.session_id,
                role: "assistant".to_string(),
                content: String::new(),
                created: Utc::now().timestamp(),
            },
        })
    }

    pub fn timeline(&self, session_id: &str) -> Option<Timeline> {
        self.store.timeline(session_id)
    }

    pub fn rename_session(&mut self, session_id: &str, display_name: &str) -> Result<Session> {
        let session = self.store.rename(session_id, display_name)?;
        self.mirror_session(&session);
        Ok(session)
    }

    /// Drop a session's events but keep the session.
    pub fn clear_session(&mut self, session_id: &str) -> Result<Session> {
        let session = self.store.clear_events(session_id)?;
        if let Some(persistence) = &self.persistence {
            persistence.clear_session_events(session_id);
            persistence.mirror_session(&session);
        }
        Ok(session)
    }

    /// Cancel the session's streams, then delete it with its events.
    pub fn delete_session(&mut self, session_id: &str) -> Result<Session> {
        self.cancel(session_id);
        let session = self
            .store
            .remove(session_id)
            .ok_or_else(|| TurnstreamError::SessionNotFound(session_id.to_string()))?;
        self.failed_sessions.remove(session_id);
        if let Some(persistence) = &self.persistence {
            persistence.delete_session(session_id);
        }
        tracing::info!("Deleted session {}", session_id);
        Ok(session)
    }

    pub fn export_session(&self, session_id: &str) -> Result<String> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| TurnstreamError::SessionNotFound(session_id.to_string()))?;
        SessionDocument::from_session(session).to_json_pretty()
    }

    /// Import an exported session and mirror every record.
    ///
    /// An id already in use is replaced with a fresh one.
    pub fn import_session(&mut self, json: &str) -> Result<Session> {
        let document = SessionDocument::from_json(json)?;
        let store = &mut self.store;
        let mut session = document.into_session(|| store.next_timestamp())?;

        if self.store.contains(&session.id) {
            let fresh = Uuid::new_v4().to_string();
            tracing::info!("Imported session id {} is taken; using {}", session.id, fresh);
            session.id = fresh;
        }

        self.store.insert_session(session.clone());
        if let Some(persistence) = &self.persistence {
            persistence.mirror_session(&session);
            for event in &session.events {
                persistence.mirror_event(&session.id, event);
            }
        }
        tracing::info!(
            "Imported session {} with {} event(s)",
            session.id,
            session.events.len()
        );
        Ok(session)
    }

    /// Wait for queued persistence writes.
    pub async fn flush(&self) -> Result<()> {
        match &self.persistence {
            Some(persistence) => persistence.flush().await,
            None => Ok(()),
        }
    }

    /// Cancel all streams and stop the persistence writer after it drains.
    pub fn shutdown(mut self) {
        let sessions: Vec<String> = self
            .streams
            .values()
            .map(|s| s.session_id().to_string())
            .collect();
        for session_id in sessions {
            self.cancel(&session_id);
        }
        if let Some(persistence) = self.persistence.take() {
            persistence.shutdown();
        }
    }
}
