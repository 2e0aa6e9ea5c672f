//! Session export and import
//!
//! The interchange format is a human-readable JSON document holding one
//! session and its events in chronological order. Import is lenient: missing
//! ids are generated and missing or unparseable timestamps become the
//! current time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Result, TurnstreamError};
use crate::session::types::{
    EventType, Session, SessionEvent, SessionStatus, SessionTarget, TargetType,
};

const IMPORTED_DISPLAY_NAME: &str = "Imported session";

/// Exported event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Exported session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub events: Vec<EventDocument>,
}

impl SessionDocument {
    /// Export a session. Events are written oldest first.
    pub fn from_session(session: &Session) -> Self {
        let (persona_id, agency_id) = match &session.target {
            SessionTarget::Persona { persona_id } => (Some(persona_id.clone()), None),
            SessionTarget::Agency { agency_id } => (None, Some(agency_id.clone())),
        };
        Self {
            id: Some(session.id.clone()),
            target_type: Some(session.target.target_type().as_str().to_string()),
            display_name: Some(session.display_name.clone()),
            persona_id,
            agency_id,
            created_at: Some(session.created_at.to_rfc3339()),
            events: session
                .events
                .iter()
                .map(|event| EventDocument {
                    id: Some(event.id.clone()),
                    timestamp: Some(event.timestamp.to_rfc3339()),
                    kind: Some(event.kind.as_str().to_string()),
                    payload: event.payload.clone(),
                })
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TurnstreamError::Interchange(format!("invalid session document: {}", e)).into())
    }

    /// Build a session from the document.
    ///
    /// `now` supplies timestamps for records that lack a usable one. Events
    /// whose type cannot be determined are skipped with a warning.
    pub fn into_session(self, mut now: impl FnMut() -> DateTime<Utc>) -> Result<Session> {
        let target = self.resolve_target()?;
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let display_name = self
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| IMPORTED_DISPLAY_NAME.to_string());
        let created_at = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(&mut now);

        let mut events = Vec::with_capacity(self.events.len());
        for record in self.events {
            let kind = record
                .kind
                .as_deref()
                .and_then(EventType::parse)
                .or_else(|| {
                    record
                        .payload
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(EventType::parse)
                });
            let Some(kind) = kind else {
                tracing::warn!(
                    "Skipping imported event {:?} in session {}: unknown type",
                    record.id,
                    id
                );
                continue;
            };
            events.push(SessionEvent {
                id: record
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Ulid::new().to_string()),
                timestamp: record
                    .timestamp
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or_else(&mut now),
                kind,
                payload: record.payload,
            });
        }

        let updated_at = events
            .last()
            .map(|e| e.timestamp)
            .unwrap_or(created_at)
            .max(created_at);

        Ok(Session {
            id,
            display_name,
            target,
            status: SessionStatus::Idle,
            created_at,
            updated_at,
            events,
        })
    }

    fn resolve_target(&self) -> Result<SessionTarget> {
        let declared = self.target_type.as_deref().and_then(TargetType::parse);
        let persona = self.persona_id.clone().filter(|id| !id.is_empty());
        let agency = self.agency_id.clone().filter(|id| !id.is_empty());

        match (declared, persona, agency) {
            (Some(TargetType::Persona), Some(p), _) | (None, Some(p), None) => {
                Ok(SessionTarget::persona(p))
            }
            (Some(TargetType::Agency), _, Some(a)) | (None, None, Some(a)) => {
                Ok(SessionTarget::agency(a))
            }
            _ => Err(TurnstreamError::Interchange(
                "session document needs a personaId or agencyId matching its targetType"
                    .to_string(),
            )
            .into()),
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::LogPayload;
    use serde_json::json;

    fn fixed() -> DateTime<Utc> {
        parse_timestamp("2025-03-01T08:00:00Z").unwrap()
    }

    #[test]
    fn test_export_then_import_preserves_session() {
        let mut session = Session::new("s1", "Chat", SessionTarget::persona("p1"), fixed());
        session.events.push(SessionEvent {
            id: "01J000000000000000000000AA".to_string(),
            timestamp: fixed(),
            kind: EventType::Log,
            payload: LogPayload::info("hi").to_value(),
        });
        session.updated_at = fixed();

        let json = SessionDocument::from_session(&session)
            .to_json_pretty()
            .expect("export");
        assert!(json.contains("\"targetType\": \"persona\""));

        let imported = SessionDocument::from_json(&json)
            .expect("parse")
            .into_session(Utc::now)
            .expect("import");
        assert_eq!(imported, session);
    }

    #[test]
    fn test_import_generates_missing_fields() {
        let doc = SessionDocument::from_json(
            r#"{"agencyId":"a1","events":[{"payload":{"type":"text_delta","streamId":"x","textDelta":"y"}}]}"#,
        )
        .expect("parse");
        let session = doc.into_session(fixed).expect("import");

        assert!(!session.id.is_empty());
        assert_eq!(session.display_name, IMPORTED_DISPLAY_NAME);
        assert_eq!(session.target, SessionTarget::agency("a1"));
        assert_eq!(session.events.len(), 1);
        assert_eq!(session.events[0].timestamp, fixed());
        assert_eq!(session.events[0].kind.as_str(), "TEXT_DELTA");
        assert!(!session.events[0].id.is_empty());
    }

    #[test]
    fn test_import_skips_untyped_events() {
        let doc: SessionDocument = serde_json::from_value(json!({
            "personaId": "p1",
            "events": [{"payload": {"message": "no type"}}, {"type": "log", "payload": {"message": "ok"}}]
        }))
        .unwrap();
        let session = doc.into_session(fixed).expect("import");
        assert_eq!(session.events.len(), 1);
        assert_eq!(session.events[0].kind, EventType::Log);
    }

    #[test]
    fn test_import_requires_a_target() {
        let doc = SessionDocument::from_json(r#"{"id":"s1","targetType":"agency","personaId":"p1"}"#)
            .expect("parse");
        assert!(doc.into_session(fixed).is_err());
        assert!(SessionDocument::from_json("not json").is_err());
    }
}
