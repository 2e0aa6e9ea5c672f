//! Chunk data types
//!
//! A [`Chunk`] is one decoded record of the orchestration engine's
//! push-stream. The set of chunk types is closed; see [`ChunkType`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::types::{AgencySnapshot, WorkflowInstance};

/// Content the producer sends in a `FINAL_RESPONSE` when it has nothing to say.
///
/// Never adopted as turn text.
pub const COMPLETION_SENTINEL: &str = "Turn processing sequence complete.";

/// Closed set of chunk type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkType {
    TextDelta,
    FinalResponse,
    FinalMarker,
    ToolCallRequest,
    ToolResultEmission,
    SystemProgress,
    Error,
    AgencyUpdate,
    WorkflowUpdate,
}

impl ChunkType {
    /// Every chunk type, in declaration order.
    pub const ALL: [ChunkType; 9] = [
        ChunkType::TextDelta,
        ChunkType::FinalResponse,
        ChunkType::FinalMarker,
        ChunkType::ToolCallRequest,
        ChunkType::ToolResultEmission,
        ChunkType::SystemProgress,
        ChunkType::Error,
        ChunkType::AgencyUpdate,
        ChunkType::WorkflowUpdate,
    ];

    /// Canonical wire tag, e.g. `TEXT_DELTA`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::TextDelta => "TEXT_DELTA",
            ChunkType::FinalResponse => "FINAL_RESPONSE",
            ChunkType::FinalMarker => "FINAL_MARKER",
            ChunkType::ToolCallRequest => "TOOL_CALL_REQUEST",
            ChunkType::ToolResultEmission => "TOOL_RESULT_EMISSION",
            ChunkType::SystemProgress => "SYSTEM_PROGRESS",
            ChunkType::Error => "ERROR",
            ChunkType::AgencyUpdate => "AGENCY_UPDATE",
            ChunkType::WorkflowUpdate => "WORKFLOW_UPDATE",
        }
    }

    /// Resolve a producer tag, ignoring ASCII case.
    ///
    /// Producers drift between `text_delta`, `TEXT_DELTA` and `Text_Delta`;
    /// all of them name the same chunk type.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
    }

    /// Whether records of this type are rejected without a `streamId`.
    pub fn requires_stream_id(&self) -> bool {
        matches!(
            self,
            ChunkType::TextDelta
                | ChunkType::FinalResponse
                | ChunkType::ToolCallRequest
                | ChunkType::ToolResultEmission
                | ChunkType::SystemProgress
        )
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tool invocation requested by the producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Type-specific part of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkBody {
    #[serde(rename_all = "camelCase")]
    TextDelta { text_delta: String },

    #[serde(rename_all = "camelCase")]
    FinalResponse {
        #[serde(default, alias = "finalResponseText")]
        content: String,
    },

    FinalMarker,

    #[serde(rename_all = "camelCase")]
    ToolCallRequest {
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },

    #[serde(rename_all = "camelCase")]
    ToolResultEmission {
        #[serde(default)]
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        tool_result: Value,
        #[serde(default = "default_true")]
        is_success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    SystemProgress {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_percentage: Option<f64>,
    },

    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    AgencyUpdate { agency: AgencySnapshot },

    WorkflowUpdate { workflow: WorkflowInstance },
}

fn default_true() -> bool {
    true
}

/// One decoded push-stream record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmi_instance_id: Option<String>,
    #[serde(flatten)]
    pub body: ChunkBody,
}

impl Chunk {
    /// Build a chunk for `stream_id` with no persona attribution.
    pub fn new(stream_id: impl Into<String>, body: ChunkBody) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            persona_id: None,
            gmi_instance_id: None,
            body,
        }
    }

    /// Attach a persona id.
    pub fn with_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }

    pub fn chunk_type(&self) -> ChunkType {
        match &self.body {
            ChunkBody::TextDelta { .. } => ChunkType::TextDelta,
            ChunkBody::FinalResponse { .. } => ChunkType::FinalResponse,
            ChunkBody::FinalMarker => ChunkType::FinalMarker,
            ChunkBody::ToolCallRequest { .. } => ChunkType::ToolCallRequest,
            ChunkBody::ToolResultEmission { .. } => ChunkType::ToolResultEmission,
            ChunkBody::SystemProgress { .. } => ChunkType::SystemProgress,
            ChunkBody::Error { .. } => ChunkType::Error,
            ChunkBody::AgencyUpdate { .. } => ChunkType::AgencyUpdate,
            ChunkBody::WorkflowUpdate { .. } => ChunkType::WorkflowUpdate,
        }
    }

    /// True for chunks that close the push-stream.
    pub fn closes_stream(&self) -> bool {
        matches!(self.body, ChunkBody::FinalMarker)
    }

    /// Canonical JSON form, as persisted in session events.
    pub fn to_value(&self) -> Value {
        // Every field is plain data, so serialization into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_tag_ignores_case() {
        assert_eq!(ChunkType::from_tag("text_delta"), Some(ChunkType::TextDelta));
        assert_eq!(ChunkType::from_tag("Final_Marker"), Some(ChunkType::FinalMarker));
        assert_eq!(
            ChunkType::from_tag(" WORKFLOW_UPDATE "),
            Some(ChunkType::WorkflowUpdate)
        );
        assert_eq!(ChunkType::from_tag("ui_command"), None);
    }

    #[test]
    fn test_to_value_uses_canonical_tag_and_camel_case() {
        let chunk = Chunk::new(
            "s1",
            ChunkBody::TextDelta {
                text_delta: "hi".to_string(),
            },
        )
        .with_persona("p1");

        let value = chunk.to_value();
        assert_eq!(
            value,
            json!({"type": "TEXT_DELTA", "streamId": "s1", "personaId": "p1", "textDelta": "hi"})
        );
    }

    #[test]
    fn test_final_marker_serializes_without_fields() {
        let chunk = Chunk::new("s1", ChunkBody::FinalMarker);
        assert_eq!(
            chunk.to_value(),
            json!({"type": "FINAL_MARKER", "streamId": "s1"})
        );
        assert!(chunk.closes_stream());
    }

    #[test]
    fn test_stream_id_requirement() {
        assert!(ChunkType::TextDelta.requires_stream_id());
        assert!(!ChunkType::FinalMarker.requires_stream_id());
        assert!(!ChunkType::Error.requires_stream_id());
        assert!(!ChunkType::WorkflowUpdate.requires_stream_id());
    }
}
