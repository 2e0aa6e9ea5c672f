//! Decoding and folding properties, through the public API only

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use turnstream::chunk::{codec, ChunkType, RecordFramer, COMPLETION_SENTINEL};
use turnstream::stream::guard::{ConcurrencyGuard, SlotKey};
use turnstream::turn::{fold, Turn};
use turnstream::TurnstreamError;

fn fold_all(records: &[serde_json::Value]) -> Option<Turn> {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let mut turn = None;
    for (i, record) in records.iter().enumerate() {
        let chunk = codec::decode(&record.to_string()).expect("decodes");
        turn = Some(fold(turn, &chunk, start + Duration::seconds(i as i64)));
    }
    turn
}

#[test]
fn test_deltas_win_over_final_response() {
    let turn = fold_all(&[
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "Hello "}),
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "there"}),
        json!({"type": "FINAL_RESPONSE", "streamId": "t", "content": "Something else"}),
    ])
    .expect("turn");

    assert_eq!(turn.text, "Hello there");
    assert!(turn.is_final);
}

#[test]
fn test_final_response_fills_empty_turn() {
    let turn = fold_all(&[
        json!({"type": "SYSTEM_PROGRESS", "streamId": "t", "message": "working"}),
        json!({"type": "FINAL_RESPONSE", "streamId": "t", "content": "Only answer"}),
    ])
    .expect("turn");

    assert_eq!(turn.text, "Only answer");
    assert!(turn.is_final);
    assert_eq!(turn.progress.len(), 1);
}

#[test]
fn test_completion_sentinel_is_never_text() {
    let turn = fold_all(&[json!({
        "type": "FINAL_RESPONSE",
        "streamId": "t",
        "content": COMPLETION_SENTINEL
    })])
    .expect("turn");

    assert_eq!(turn.text, "");
    assert!(turn.is_final);
}

#[test]
fn test_final_marker_adds_no_text() {
    let turn = fold_all(&[
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "x"}),
        json!({"type": "FINAL_MARKER", "streamId": "t"}),
    ])
    .expect("turn");

    assert_eq!(turn.text, "x");
    assert!(turn.is_final);
}

#[test]
fn test_updated_at_follows_last_chunk() {
    let turn = fold_all(&[
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "a"}),
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "b"}),
        json!({"type": "TEXT_DELTA", "streamId": "t", "textDelta": "c"}),
    ])
    .expect("turn");

    assert_eq!(turn.updated_at - turn.created_at, Duration::seconds(2));
}

#[test]
fn test_decode_rejects_without_panicking() {
    for raw in [
        "",
        "   ",
        "[1,2,3]",
        "{\"type\": 7}",
        "{\"type\": \"TEXT_DELTA\", \"textDelta\": \"no stream\"}",
        "{\"type\": \"UNKNOWN_KIND\", \"streamId\": \"t\"}",
        "{\"streamId\": \"t\"}",
    ] {
        let err = codec::decode(raw).expect_err(raw);
        assert!(matches!(err, TurnstreamError::Decode(_)), "{}", raw);
    }
}

#[test]
fn test_decode_accepts_tag_case_and_aliases() {
    let chunk =
        codec::decode(r#"{"type":"final_response","streamId":"t","finalResponseText":"Done"}"#)
            .expect("decodes");
    assert_eq!(chunk.chunk_type(), ChunkType::FinalResponse);

    let marker = codec::decode(r#"{"isFinal":true}"#).expect("bare marker");
    assert_eq!(marker.chunk_type(), ChunkType::FinalMarker);
    assert!(marker.closes_stream());
}

#[test]
fn test_framer_splits_records_across_reads() {
    let mut framer = RecordFramer::new();
    let first = framer.push(b"data: {\"type\":\"TEXT_DELTA\",\"streamId\":\"t\",");
    assert!(first.is_empty());

    let records = framer.push(b"\"textDelta\":\"hi\"}\n\n: keepalive\nevent: chunk\n");
    assert_eq!(records.len(), 1);
    let raw = records.into_iter().next().unwrap().expect("record");
    assert_eq!(codec::decode(&raw).unwrap().chunk_type(), ChunkType::TextDelta);

    framer.push(b"{\"type\":\"FINAL_MARKER\",\"streamId\":\"t\"}");
    let tail = framer.finish().expect("trailing record").expect("valid");
    assert!(codec::decode(&tail).unwrap().closes_stream());
    assert_eq!(framer.pending_len(), 0);
}

#[test]
fn test_guard_fences_slots_independently() {
    let mut guard = ConcurrencyGuard::new();

    let persona = guard.acquire(SlotKey::persona("s1")).expect("persona");
    let writer = guard.acquire(SlotKey::seat("ag1", "writer")).expect("writer");
    let editor = guard.acquire(SlotKey::seat("ag1", "editor")).expect("editor");
    assert_eq!(guard.active_seats("ag1"), 2);

    match guard.acquire(SlotKey::seat("ag1", "writer")) {
        Err(TurnstreamError::AlreadyStreaming { .. }) => {}
        other => panic!("expected AlreadyStreaming, got {:?}", other),
    }
    assert!(guard.acquire(SlotKey::persona("s2")).is_ok());

    assert!(guard.release(&writer));
    assert!(!guard.release(&writer));
    let again = guard.acquire(SlotKey::seat("ag1", "writer")).expect("reacquire");
    assert_ne!(again.id, writer.id);

    // A stale ticket cannot release the new holder.
    assert!(!guard.release(&writer));
    assert!(guard.is_held(&SlotKey::seat("ag1", "writer")));

    assert!(guard.release(&persona));
    assert!(guard.release(&editor));
    assert_eq!(guard.active_seats("ag1"), 1);
}
