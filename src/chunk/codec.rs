//! Chunk codec
//!
//! Turns one push-stream record into a [`Chunk`]. Decoding never panics and
//! never aborts the stream: every failure is a [`TurnstreamError::Decode`]
//! which callers log and drop.

use serde_json::Value;

use crate::chunk::types::{Chunk, ChunkType};
use crate::error::TurnstreamError;

/// Decode a raw JSON record.
///
/// # Examples
///
/// ```
/// use turnstream::chunk::{codec, ChunkType};
///
/// let chunk = codec::decode(r#"{"type":"text_delta","streamId":"s1","textDelta":"Hi"}"#).unwrap();
/// assert_eq!(chunk.chunk_type(), ChunkType::TextDelta);
///
/// assert!(codec::decode("{not json").is_err());
/// ```
pub fn decode(raw: &str) -> Result<Chunk, TurnstreamError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TurnstreamError::Decode("empty record".to_string()));
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| TurnstreamError::Decode(format!("invalid JSON: {}", e)))?;

    decode_value(value)
}

/// Decode an already-parsed JSON value.
///
/// The `type` tag is matched case-insensitively and rewritten to its
/// canonical form before the body is deserialized. A record with no tag but
/// `isFinal: true` is a final marker.
pub fn decode_value(mut value: Value) -> Result<Chunk, TurnstreamError> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| TurnstreamError::Decode("record is not a JSON object".to_string()))?;

    let kind = match object.get("type") {
        Some(Value::String(tag)) => ChunkType::from_tag(tag)
            .ok_or_else(|| TurnstreamError::Decode(format!("unknown chunk type: {}", tag)))?,
        Some(other) => {
            return Err(TurnstreamError::Decode(format!(
                "type tag must be a string, got {}",
                other
            )))
        }
        None if object.get("isFinal").and_then(Value::as_bool) == Some(true) => {
            ChunkType::FinalMarker
        }
        None => return Err(TurnstreamError::Decode("missing type tag".to_string())),
    };

    object.insert("type".to_string(), Value::String(kind.as_str().to_string()));

    if kind.requires_stream_id() {
        let has_stream_id = object
            .get("streamId")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_stream_id {
            return Err(TurnstreamError::Decode(format!(
                "{} chunk without streamId",
                kind
            )));
        }
    }

    serde_json::from_value(value)
        .map_err(|e| TurnstreamError::Decode(format!("malformed {} chunk: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::types::ChunkBody;
    use serde_json::json;

    #[test]
    fn test_decode_text_delta_with_lowercase_tag() {
        let chunk =
            decode(r#"{"type":"text_delta","streamId":"s1","personaId":"p1","textDelta":"Hel"}"#)
                .expect("decode");
        assert_eq!(chunk.stream_id.as_deref(), Some("s1"));
        assert_eq!(chunk.persona_id.as_deref(), Some("p1"));
        assert_eq!(
            chunk.body,
            ChunkBody::TextDelta {
                text_delta: "Hel".to_string()
            }
        );
    }

    #[test]
    fn test_decode_final_response_accepts_alias() {
        let chunk = decode(
            r#"{"type":"FINAL_RESPONSE","streamId":"s1","finalResponseText":"Answer"}"#,
        )
        .expect("decode");
        assert_eq!(
            chunk.body,
            ChunkBody::FinalResponse {
                content: "Answer".to_string()
            }
        );
    }

    #[test]
    fn test_decode_untagged_is_final_is_marker() {
        let chunk = decode(r#"{"isFinal":true,"streamId":"s9"}"#).expect("decode");
        assert_eq!(chunk.chunk_type(), ChunkType::FinalMarker);
        assert_eq!(chunk.stream_id.as_deref(), Some("s9"));
    }

    #[test]
    fn test_decode_marker_without_stream_id() {
        let chunk = decode(r#"{"type":"final_marker"}"#).expect("decode");
        assert!(chunk.stream_id.is_none());
        assert!(chunk.closes_stream());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = decode(r#"{"type":"TEXT_DELTA","#).unwrap_err();
        assert!(matches!(err, TurnstreamError::Decode(msg) if msg.starts_with("invalid JSON")));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode(r#"{"type":"UI_COMMAND","streamId":"s1"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown chunk type: UI_COMMAND"));
    }

    #[test]
    fn test_decode_rejects_missing_stream_id() {
        let err = decode(r#"{"type":"TEXT_DELTA","textDelta":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("without streamId"));
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        let err = decode(r#"{"type":"TEXT_DELTA","streamId":"s1"}"#).unwrap_err();
        assert!(err.to_string().contains("malformed TEXT_DELTA chunk"));
    }

    #[test]
    fn test_decode_rejects_non_object_and_empty() {
        assert!(decode("[1,2]").is_err());
        assert!(decode("   ").is_err());
        assert!(decode(r#"{"type":5}"#).is_err());
    }

    #[test]
    fn test_decode_error_without_stream_id_is_allowed() {
        let chunk = decode(r#"{"type":"error","message":"upstream exploded"}"#).expect("decode");
        assert!(chunk.stream_id.is_none());
        assert_eq!(chunk.chunk_type(), ChunkType::Error);
    }

    #[test]
    fn test_decode_tool_call_request() {
        let chunk = decode(
            r#"{"type":"TOOL_CALL_REQUEST","streamId":"s1","toolCalls":[{"id":"c1","name":"search","arguments":{"q":"rust"}}]}"#,
        )
        .expect("decode");
        match chunk.body {
            ChunkBody::ToolCallRequest { tool_calls } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].name, "search");
                assert_eq!(tool_calls[0].arguments, json!({"q": "rust"}));
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_decode_agency_update_snapshot() {
        let chunk = decode(
            r#"{"type":"AGENCY_UPDATE","streamId":"s1","agency":{"agencyId":"a1","seats":[{"roleId":"lead","personaId":"p1","status":"active"}]}}"#,
        )
        .expect("decode");
        match chunk.body {
            ChunkBody::AgencyUpdate { agency } => {
                assert_eq!(agency.agency_id, "a1");
                assert_eq!(agency.seats[0].status, "active");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_decode_value_round_trips_canonical_form() {
        let chunk = decode(
            r#"{"type":"system_progress","streamId":"s1","message":"Thinking","progressPercentage":40}"#,
        )
        .expect("decode");
        let again = decode_value(chunk.to_value()).expect("re-decode");
        assert_eq!(chunk, again);
    }
}
