//! In-memory session registry
//!
//! [`SessionStore`] is the single source of truth for the running process.
//! Every mutation is synchronous and completes before the next one starts.
//! Session events are append-only; agency and workflow snapshots are
//! last-write-wins and replaced whole, with no field-level merge.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use ulid::Ulid;

use crate::error::{Result, TurnstreamError};
use crate::session::types::{
    AgencyDefinition, AgencySeat, AgencySnapshot, EventType, LogPayload, PersonaSummary, Session,
    SessionEvent, SessionStatus, SessionTarget, WorkflowInstance, PENDING_SEAT_STATUS,
};
use crate::turn::Timeline;

/// Registry of sessions, catalog entries and runtime snapshots
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    personas: HashMap<String, PersonaSummary>,
    agencies: HashMap<String, AgencyDefinition>,
    agency_snapshots: HashMap<String, AgencySnapshot>,
    workflow_snapshots: HashMap<String, WorkflowInstance>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all sessions with ones loaded at startup.
    pub fn adopt(&mut self, sessions: Vec<Session>) {
        self.sessions.clear();
        for session in sessions {
            self.observe_timestamp(session.updated_at);
            if let Some(last) = session.events.last() {
                self.observe_timestamp(last.timestamp);
            }
            self.sessions.insert(session.id.clone(), session);
        }
    }

    /// Next event timestamp: wall-clock time, forced strictly increasing.
    pub fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next
    }

    fn observe_timestamp(&mut self, at: DateTime<Utc>) {
        if self.last_timestamp.map_or(true, |last| at > last) {
            self.last_timestamp = Some(at);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| TurnstreamError::SessionNotFound(id.to_string()).into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Sessions ordered by `updated_at`, most recent first.
    pub fn list(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the session with `id`, creating an idle one if it is missing.
    ///
    /// The second value is true when the session was created by this call.
    pub fn ensure_session(
        &mut self,
        id: &str,
        display_name: &str,
        target: SessionTarget,
    ) -> (Session, bool) {
        if let Some(existing) = self.sessions.get(id) {
            return (existing.clone(), false);
        }
        let now = self.next_timestamp();
        let session = Session::new(id, display_name, target, now);
        self.sessions.insert(id.to_string(), session.clone());
        (session, true)
    }

    /// Insert or overwrite a whole session (used by import).
    pub fn insert_session(&mut self, session: Session) {
        self.observe_timestamp(session.updated_at);
        if let Some(last) = session.events.last() {
            self.observe_timestamp(last.timestamp);
        }
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn rename(&mut self, id: &str, display_name: &str) -> Result<Session> {
        let now = self.next_timestamp();
        let session = self.get_mut(id)?;
        session.display_name = display_name.to_string();
        session.updated_at = now;
        Ok(session.clone())
    }

    /// Drop a session's events, keeping its identity.
    pub fn clear_events(&mut self, id: &str) -> Result<Session> {
        let now = self.next_timestamp();
        let session = self.get_mut(id)?;
        session.events.clear();
        session.updated_at = now;
        Ok(session.clone())
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn set_status(&mut self, id: &str, status: SessionStatus) -> Result<Session> {
        let now = self.next_timestamp();
        let session = self.get_mut(id)?;
        session.status = status;
        session.updated_at = now;
        Ok(session.clone())
    }

    /// Append an immutable event and return it.
    pub fn append_event(
        &mut self,
        session_id: &str,
        kind: EventType,
        payload: Value,
    ) -> Result<SessionEvent> {
        if !self.sessions.contains_key(session_id) {
            return Err(TurnstreamError::SessionNotFound(session_id.to_string()).into());
        }
        let timestamp = self.next_timestamp();
        let event = SessionEvent {
            id: Ulid::new().to_string(),
            timestamp,
            kind,
            payload,
        };
        let session = self.get_mut(session_id)?;
        session.events.push(event.clone());
        session.updated_at = timestamp;
        Ok(event)
    }

    pub fn append_log(&mut self, session_id: &str, log: &LogPayload) -> Result<SessionEvent> {
        self.append_event(session_id, EventType::Log, log.to_value())
    }

    /// Timeline derived from the session's current events.
    pub fn timeline(&self, session_id: &str) -> Option<Timeline> {
        self.sessions
            .get(session_id)
            .map(|session| Timeline::from_events(&session.events))
    }

    pub fn upsert_persona(&mut self, persona: PersonaSummary) {
        self.personas.insert(persona.id.clone(), persona);
    }

    pub fn persona(&self, id: &str) -> Option<&PersonaSummary> {
        self.personas.get(id)
    }

    pub fn personas(&self) -> Vec<&PersonaSummary> {
        let mut personas: Vec<&PersonaSummary> = self.personas.values().collect();
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        personas
    }

    pub fn upsert_agency(&mut self, agency: AgencyDefinition) {
        self.agencies.insert(agency.id.clone(), agency);
    }

    pub fn agency(&self, id: &str) -> Option<&AgencyDefinition> {
        self.agencies.get(id)
    }

    /// Replace the agency's runtime snapshot wholesale.
    ///
    /// Fields missing from `snapshot` are not carried over from the previous
    /// one; producers send complete snapshots.
    pub fn apply_agency_snapshot(&mut self, snapshot: AgencySnapshot) {
        self.agency_snapshots
            .insert(snapshot.agency_id.clone(), snapshot);
    }

    pub fn agency_snapshot(&self, agency_id: &str) -> Option<&AgencySnapshot> {
        self.agency_snapshots.get(agency_id)
    }

    /// Seats of an agency: the latest snapshot's seats, or the static
    /// participants as `pending` seats when no snapshot has arrived.
    pub fn seats(&self, agency_id: &str) -> Vec<AgencySeat> {
        if let Some(snapshot) = self.agency_snapshots.get(agency_id) {
            return snapshot.seats.clone();
        }
        self.agencies
            .get(agency_id)
            .map(|agency| {
                agency
                    .participants
                    .iter()
                    .map(|p| AgencySeat {
                        role_id: p.role_id.clone(),
                        persona_id: p.persona_id.clone(),
                        gmi_instance_id: None,
                        status: PENDING_SEAT_STATUS.to_string(),
                        metadata: Value::Null,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the workflow's runtime snapshot wholesale.
    pub fn apply_workflow_snapshot(&mut self, workflow: WorkflowInstance) {
        self.workflow_snapshots
            .insert(workflow.workflow_id.clone(), workflow);
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowInstance> {
        self.workflow_snapshots.get(workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::AgencyParticipant;
    use serde_json::json;

    fn store_with_session(id: &str) -> SessionStore {
        let mut store = SessionStore::new();
        store.ensure_session(id, "Chat", SessionTarget::persona("p1"));
        store
    }

    #[test]
    fn test_ensure_session_creates_once() {
        let mut store = SessionStore::new();
        let (first, created) = store.ensure_session("s1", "One", SessionTarget::persona("p1"));
        assert!(created);
        assert_eq!(first.status, SessionStatus::Idle);

        let (again, created) = store.ensure_session("s1", "Other", SessionTarget::persona("p2"));
        assert!(!created);
        assert_eq!(again.display_name, "One");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_event_is_ordered_and_monotonic() {
        let mut store = store_with_session("s1");
        let a = store
            .append_log("s1", &LogPayload::info("first"))
            .expect("append");
        let b = store
            .append_log("s1", &LogPayload::info("second"))
            .expect("append");
        assert!(b.timestamp > a.timestamp);
        assert_ne!(a.id, b.id);

        let session = store.get("s1").expect("session");
        assert_eq!(session.events, vec![a, b.clone()]);
        assert_eq!(session.updated_at, b.timestamp);
    }

    #[test]
    fn test_append_to_missing_session_fails() {
        let mut store = SessionStore::new();
        let err = store
            .append_event("nope", EventType::Log, json!({"message": "x"}))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TurnstreamError>(),
            Some(TurnstreamError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_rename_clear_and_remove() {
        let mut store = store_with_session("s1");
        store
            .append_log("s1", &LogPayload::info("hello"))
            .expect("append");

        let renamed = store.rename("s1", "Renamed").expect("rename");
        assert_eq!(renamed.display_name, "Renamed");

        let cleared = store.clear_events("s1").expect("clear");
        assert!(cleared.events.is_empty());
        assert_eq!(cleared.display_name, "Renamed");

        assert!(store.remove("s1").is_some());
        assert!(store.get("s1").is_none());
        assert!(store.rename("s1", "x").is_err());
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let mut store = SessionStore::new();
        store.ensure_session("old", "Old", SessionTarget::persona("p1"));
        store.ensure_session("new", "New", SessionTarget::persona("p1"));
        store
            .append_log("old", &LogPayload::info("bump"))
            .expect("append");
        let ids: Vec<&str> = store.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[test]
    fn test_agency_snapshot_replaces_without_merge() {
        let mut store = SessionStore::new();
        store.apply_agency_snapshot(AgencySnapshot {
            agency_id: "a1".to_string(),
            workflow_id: Some("w1".to_string()),
            seats: vec![],
            metadata: json!({"round": 1}),
        });
        store.apply_agency_snapshot(AgencySnapshot {
            agency_id: "a1".to_string(),
            workflow_id: None,
            seats: vec![],
            metadata: Value::Null,
        });
        let snapshot = store.agency_snapshot("a1").expect("snapshot");
        assert!(snapshot.workflow_id.is_none());
        assert!(snapshot.metadata.is_null());
    }

    #[test]
    fn test_seats_fall_back_to_pending_participants() {
        let mut store = SessionStore::new();
        store.upsert_agency(AgencyDefinition {
            id: "a1".to_string(),
            name: "Research".to_string(),
            goal: "Survey".to_string(),
            workflow_id: None,
            participants: vec![AgencyParticipant {
                role_id: "lead".to_string(),
                persona_id: "p1".to_string(),
            }],
        });

        let seats = store.seats("a1");
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].status, PENDING_SEAT_STATUS);

        store.apply_agency_snapshot(AgencySnapshot {
            agency_id: "a1".to_string(),
            workflow_id: None,
            seats: vec![AgencySeat {
                role_id: "lead".to_string(),
                persona_id: "p1".to_string(),
                gmi_instance_id: Some("gmi-1".to_string()),
                status: "active".to_string(),
                metadata: Value::Null,
            }],
            metadata: Value::Null,
        });
        assert_eq!(store.seats("a1")[0].status, "active");
        assert!(store.seats("unknown").is_empty());
    }

    #[test]
    fn test_workflow_snapshot_last_write_wins() {
        let mut store = SessionStore::new();
        let first: WorkflowInstance = serde_json::from_value(json!({
            "workflowId": "w1",
            "definitionId": "d1",
            "status": "running",
            "tasks": {"t1": {"status": "done", "output": 1}}
        }))
        .unwrap();
        let second: WorkflowInstance = serde_json::from_value(json!({
            "workflowId": "w1",
            "status": "completed"
        }))
        .unwrap();
        store.apply_workflow_snapshot(first);
        store.apply_workflow_snapshot(second);

        let workflow = store.workflow("w1").expect("workflow");
        assert_eq!(workflow.status, "completed");
        assert!(workflow.tasks.is_empty());
        assert_eq!(workflow.definition_id, "");
    }

    #[test]
    fn test_adopt_advances_clock_past_loaded_events() {
        let mut source = store_with_session("s1");
        source
            .append_log("s1", &LogPayload::info("x"))
            .expect("append");
        let loaded = source.get("s1").cloned().expect("session");
        let last = loaded.events[0].timestamp;

        let mut store = SessionStore::new();
        store.adopt(vec![loaded]);
        assert!(store.next_timestamp() > last);
    }
}
