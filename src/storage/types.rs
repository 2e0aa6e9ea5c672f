use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the `sessions` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    /// Session id
    pub id: String,
    /// User-facing name
    pub display_name: String,
    /// `persona` or `agency`
    pub target_type: String,
    /// Persona id or agency id, depending on `target_type`
    pub target_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata; carries the session status
    pub metadata: Value,
}

/// One row of the `events` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub session_id: String,
    /// Event id, unique within its session
    pub event_id: String,
    /// Chunk type tag or `log`
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Counters folded into `session_telemetry` when an event is stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryDelta<'a> {
    pub chunks: u64,
    pub errors: u64,
    pub stream_id: Option<&'a str>,
}

/// One row of the `session_telemetry` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub session_id: String,
    /// Stored chunk events (log events excluded)
    pub chunk_count: u64,
    /// Stored error chunks and error log events
    pub error_count: u64,
    /// Stream id of the most recent chunk that carried one
    pub last_stream_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
