//! Session, event and runtime snapshot types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunk::{codec, Chunk, ChunkType};

/// Which kind of target a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Persona,
    Agency,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Persona => "persona",
            TargetType::Agency => "agency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "persona" => Some(TargetType::Persona),
            "agency" => Some(TargetType::Agency),
            _ => None,
        }
    }
}

/// Session target; the persona and agency references are mutually exclusive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "targetType", rename_all = "lowercase")]
pub enum SessionTarget {
    #[serde(rename_all = "camelCase")]
    Persona { persona_id: String },
    #[serde(rename_all = "camelCase")]
    Agency { agency_id: String },
}

impl SessionTarget {
    pub fn persona(persona_id: impl Into<String>) -> Self {
        SessionTarget::Persona {
            persona_id: persona_id.into(),
        }
    }

    pub fn agency(agency_id: impl Into<String>) -> Self {
        SessionTarget::Agency {
            agency_id: agency_id.into(),
        }
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            SessionTarget::Persona { .. } => TargetType::Persona,
            SessionTarget::Agency { .. } => TargetType::Agency,
        }
    }

    /// The persona id or agency id, whichever applies.
    pub fn target_ref(&self) -> &str {
        match self {
            SessionTarget::Persona { persona_id } => persona_id,
            SessionTarget::Agency { agency_id } => agency_id,
        }
    }

    pub fn from_parts(target_type: TargetType, target_ref: impl Into<String>) -> Self {
        match target_type {
            TargetType::Persona => SessionTarget::persona(target_ref),
            TargetType::Agency => SessionTarget::agency(target_ref),
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(SessionStatus::Idle),
            "streaming" => Some(SessionStatus::Streaming),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }
}

/// Event type tag: a chunk type, or the synthetic `log` type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    Chunk(ChunkType),
    Log,
}

impl EventType {
    pub const LOG_TAG: &'static str = "log";

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Chunk(kind) => kind.as_str(),
            EventType::Log => Self::LOG_TAG,
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case(Self::LOG_TAG) {
            return Some(EventType::Log);
        }
        ChunkType::from_tag(tag).map(EventType::Chunk)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for EventType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        EventType::parse(&value).ok_or_else(|| format!("unknown event type: {}", value))
    }
}

/// Severity of a locally generated log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Payload of a synthetic `log` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl LogPayload {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some(LogLevel::Error),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some(LogLevel::Info),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One immutable entry in a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Value,
}

impl SessionEvent {
    /// Re-decode the payload of a chunk event.
    ///
    /// Returns `None` for log events and for payloads that no longer decode.
    pub fn chunk(&self) -> Option<Chunk> {
        match self.kind {
            EventType::Chunk(_) => codec::decode_value(self.payload.clone()).ok(),
            EventType::Log => None,
        }
    }

    /// Payload of a log event.
    pub fn log(&self) -> Option<LogPayload> {
        match self.kind {
            EventType::Log => serde_json::from_value(self.payload.clone()).ok(),
            EventType::Chunk(_) => None,
        }
    }
}

/// A conversational session with a persona or an agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub target: SessionTarget,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Chronological; the newest event is last.
    pub events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        target: SessionTarget,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            target,
            status: SessionStatus::Idle,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    /// Events as the timeline shows them: newest first.
    pub fn events_newest_first(&self) -> impl Iterator<Item = &SessionEvent> {
        self.events.iter().rev()
    }
}

/// Catalog entry for a persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Static participant of an agency definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyParticipant {
    pub role_id: String,
    pub persona_id: String,
}

/// Agency definition, as configured by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub participants: Vec<AgencyParticipant>,
}

/// Runtime view of one seat inside an agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencySeat {
    pub role_id: String,
    #[serde(default)]
    pub persona_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmi_instance_id: Option<String>,
    #[serde(default = "default_seat_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Seat status before any AGENCY_UPDATE has arrived.
pub const PENDING_SEAT_STATUS: &str = "pending";

fn default_seat_status() -> String {
    PENDING_SEAT_STATUS.to_string()
}

/// Runtime snapshot of an agency, carried whole by each AGENCY_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencySnapshot {
    pub agency_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub seats: Vec<AgencySeat>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Snapshot of one task within a workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runtime snapshot of a workflow, carried whole by each WORKFLOW_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub workflow_id: String,
    #[serde(default)]
    pub definition_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tasks: BTreeMap<String, WorkflowTask>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}
