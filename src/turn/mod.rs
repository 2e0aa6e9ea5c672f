//! Turn aggregation
//!
//! A [`Turn`] is the assistant's evolving answer for one stream id. It is
//! derived state: [`fold`] is a pure function, so folding the same chunks in
//! the same order always yields the same turn, and a session's turns can be
//! rebuilt from its persisted events at any time.
//!
//! Folding rules, in priority order:
//!
//! 1. `FINAL_MARKER` sets `is_final` and never adds text.
//! 2. `TEXT_DELTA` appends to `text`.
//! 3. `FINAL_RESPONSE` sets `is_final`; its content becomes `text` only when
//!    no delta text arrived and the content is not the completion sentinel.
//! 4. `TOOL_CALL_REQUEST`, `TOOL_RESULT_EMISSION` and `ERROR` become one-line
//!    log entries of an open turn (see [`attaches`]).
//! 5. `SYSTEM_PROGRESS` becomes a progress sample.

pub mod timeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkBody, ChunkType, ToolCall, COMPLETION_SENTINEL};

pub use timeline::{Timeline, TimelineEntry};

/// One line of tool or error activity within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnLogEntry {
    pub at: DateTime<Utc>,
    pub kind: ChunkType,
    pub line: String,
}

impl std::fmt::Display for TurnLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.line)
    }
}

/// One progress report within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    pub at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

/// Aggregated state of one assistant response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub text: String,
    pub is_final: bool,
    pub logs: Vec<TurnLogEntry>,
    pub progress: Vec<ProgressSample>,
}

impl Turn {
    fn empty(chunk: &Chunk, at: DateTime<Utc>) -> Self {
        Self {
            stream_id: chunk.stream_id.clone().unwrap_or_default(),
            persona_id: chunk.persona_id.clone(),
            created_at: at,
            updated_at: at,
            ..Default::default()
        }
    }

    /// Most recent progress sample, if any.
    pub fn latest_progress(&self) -> Option<&ProgressSample> {
        self.progress.last()
    }
}

/// Whether `chunk` belongs in a turn rather than as a standalone entry.
///
/// Chunks without a stream id and snapshot updates never attach. Tool and
/// error chunks attach only to a turn that already exists for their stream.
pub fn attaches(existing: Option<&Turn>, chunk: &Chunk) -> bool {
    if chunk.stream_id.as_deref().map_or(true, str::is_empty) {
        return false;
    }
    match chunk.chunk_type() {
        ChunkType::TextDelta
        | ChunkType::FinalResponse
        | ChunkType::FinalMarker
        | ChunkType::SystemProgress => true,
        ChunkType::ToolCallRequest | ChunkType::ToolResultEmission | ChunkType::Error => {
            existing.is_some()
        }
        ChunkType::AgencyUpdate | ChunkType::WorkflowUpdate => false,
    }
}

/// Fold one chunk into the turn for its stream.
///
/// `at` is the timestamp of the session event carrying the chunk, which keeps
/// the fold independent of wall-clock time. A missing turn is created empty.
/// Callers decide with [`attaches`] whether the chunk should reach a turn at
/// all; snapshot updates leave the turn unchanged.
pub fn fold(turn: Option<Turn>, chunk: &Chunk, at: DateTime<Utc>) -> Turn {
    let mut turn = turn.unwrap_or_else(|| Turn::empty(chunk, at));
    if turn.persona_id.is_none() {
        turn.persona_id = chunk.persona_id.clone();
    }

    match &chunk.body {
        ChunkBody::FinalMarker => {
            turn.is_final = true;
        }
        ChunkBody::TextDelta { text_delta } => {
            turn.text.push_str(text_delta);
        }
        ChunkBody::FinalResponse { content } => {
            if turn.text.is_empty() && adoptable(content) {
                turn.text = content.clone();
            }
            turn.is_final = true;
        }
        ChunkBody::ToolCallRequest { tool_calls } => {
            turn.logs.push(TurnLogEntry {
                at,
                kind: ChunkType::ToolCallRequest,
                line: describe_tool_calls(tool_calls),
            });
        }
        ChunkBody::ToolResultEmission {
            tool_name,
            is_success,
            error_message,
            ..
        } => {
            let line = match (is_success, error_message) {
                (true, _) => format!("tool result: {} ok", tool_name),
                (false, Some(message)) => format!("tool result: {} failed: {}", tool_name, message),
                (false, None) => format!("tool result: {} failed", tool_name),
            };
            turn.logs.push(TurnLogEntry {
                at,
                kind: ChunkType::ToolResultEmission,
                line,
            });
        }
        ChunkBody::Error { code, message, .. } => {
            let line = match code {
                Some(code) => format!("error [{}]: {}", code, message),
                None => format!("error: {}", message),
            };
            turn.logs.push(TurnLogEntry {
                at,
                kind: ChunkType::Error,
                line,
            });
        }
        ChunkBody::SystemProgress {
            message,
            progress_percentage,
        } => {
            turn.progress.push(ProgressSample {
                at,
                message: message.clone(),
                percentage: *progress_percentage,
            });
        }
        ChunkBody::AgencyUpdate { .. } | ChunkBody::WorkflowUpdate { .. } => return turn,
    }

    turn.updated_at = at;
    turn
}

/// Whether final-response content may stand in for the turn's text.
///
/// Whitespace-only content and the completion sentinel are not answers.
pub fn adoptable(content: &str) -> bool {
    let trimmed = content.trim();
    !trimmed.is_empty() && trimmed != COMPLETION_SENTINEL
}

fn describe_tool_calls(tool_calls: &[ToolCall]) -> String {
    if tool_calls.is_empty() {
        return "tool call: (none)".to_string();
    }
    let calls: Vec<String> = tool_calls
        .iter()
        .map(|call| {
            if call.arguments.is_null() {
                format!("{}()", call.name)
            } else {
                format!("{}({})", call.name, call.arguments)
            }
        })
        .collect();
    format!("tool call: {}", calls.join(", "))
}
