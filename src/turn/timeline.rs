//! Session timeline projection
//!
//! The timeline interleaves turns with standalone entries in the order their
//! first event arrived. Each stream id is an independent fold; chunks of
//! different streams may interleave freely.

use std::collections::HashMap;

use crate::chunk::Chunk;
use crate::session::types::SessionEvent;
use crate::turn::{attaches, fold, Turn};

/// One row of the timeline
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    /// Aggregated turn for a stream id
    Turn(Turn),
    /// Log event, snapshot update, or a chunk with no turn to attach to
    Event(SessionEvent),
}

/// Turns and standalone entries derived from a session's events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    turn_index: HashMap<String, usize>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a timeline from chronological events.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SessionEvent>) -> Self {
        let mut timeline = Self::new();
        for event in events {
            timeline.apply(event);
        }
        timeline
    }

    /// Apply one event, decoding its payload if it carries a chunk.
    ///
    /// Payloads that no longer decode are kept as standalone entries.
    pub fn apply(&mut self, event: &SessionEvent) {
        match event.chunk() {
            Some(chunk) => self.apply_chunk(event, &chunk),
            None => self.entries.push(TimelineEntry::Event(event.clone())),
        }
    }

    /// Apply an event whose chunk is already decoded.
    pub fn apply_chunk(&mut self, event: &SessionEvent, chunk: &Chunk) {
        let existing = chunk
            .stream_id
            .as_deref()
            .and_then(|id| self.turn_index.get(id).copied());

        let existing_turn = existing.and_then(|idx| match &self.entries[idx] {
            TimelineEntry::Turn(turn) => Some(turn),
            TimelineEntry::Event(_) => None,
        });

        if !attaches(existing_turn, chunk) {
            self.entries.push(TimelineEntry::Event(event.clone()));
            return;
        }

        match existing {
            Some(idx) => {
                if let TimelineEntry::Turn(turn) = &mut self.entries[idx] {
                    let current = std::mem::take(turn);
                    *turn = fold(Some(current), chunk, event.timestamp);
                }
            }
            None => {
                let turn = fold(None, chunk, event.timestamp);
                self.turn_index
                    .insert(turn.stream_id.clone(), self.entries.len());
                self.entries.push(TimelineEntry::Turn(turn));
            }
        }
    }

    /// Entries in arrival order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Entries as the dashboard shows them: newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.entries.iter().rev()
    }

    pub fn turn(&self, stream_id: &str) -> Option<&Turn> {
        self.turn_index
            .get(stream_id)
            .and_then(|idx| match &self.entries[*idx] {
                TimelineEntry::Turn(turn) => Some(turn),
                TimelineEntry::Event(_) => None,
            })
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.entries.iter().filter_map(|entry| match entry {
            TimelineEntry::Turn(turn) => Some(turn),
            TimelineEntry::Event(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkBody, ChunkType};
    use crate::session::types::{EventType, LogPayload};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn event(seq: i64, chunk: &Chunk) -> SessionEvent {
        SessionEvent {
            id: format!("e{}", seq),
            timestamp: DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + Duration::milliseconds(seq),
            kind: EventType::Chunk(chunk.chunk_type()),
            payload: chunk.to_value(),
        }
    }

    fn delta(stream: &str, text: &str) -> Chunk {
        Chunk::new(
            stream,
            ChunkBody::TextDelta {
                text_delta: text.to_string(),
            },
        )
    }

    #[test]
    fn test_interleaved_streams_fold_independently() {
        let events = vec![
            event(1, &delta("a", "one ")),
            event(2, &delta("b", "uno ")),
            event(3, &delta("a", "two")),
            event(4, &delta("b", "dos")),
        ];
        let timeline = Timeline::from_events(&events);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.turn("a").map(|t| t.text.as_str()), Some("one two"));
        assert_eq!(timeline.turn("b").map(|t| t.text.as_str()), Some("uno dos"));
    }

    #[test]
    fn test_orphan_tool_call_is_standalone() {
        let call = Chunk::new("s1", ChunkBody::ToolCallRequest { tool_calls: vec![] });
        let events = vec![event(1, &call), event(2, &delta("s1", "hi"))];
        let timeline = Timeline::from_events(&events);

        assert_eq!(timeline.len(), 2);
        assert!(matches!(
            &timeline.entries()[0],
            TimelineEntry::Event(e) if e.kind == EventType::Chunk(ChunkType::ToolCallRequest)
        ));
        assert!(timeline.turn("s1").map(|t| t.logs.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_log_events_and_newest_first() {
        let log = SessionEvent {
            id: "log-1".to_string(),
            timestamp: Utc::now(),
            kind: EventType::Log,
            payload: LogPayload::error("stream failed").to_value(),
        };
        let events = vec![event(1, &delta("s1", "hi")), log.clone()];
        let timeline = Timeline::from_events(&events);

        let newest: Vec<&TimelineEntry> = timeline.newest_first().collect();
        assert_eq!(newest[0], &TimelineEntry::Event(log));
        assert!(matches!(newest[1], TimelineEntry::Turn(_)));
    }

    #[test]
    fn test_corrupt_chunk_payload_is_kept_standalone() {
        let broken = SessionEvent {
            id: "bad".to_string(),
            timestamp: Utc::now(),
            kind: EventType::Chunk(ChunkType::TextDelta),
            payload: json!({"type": "TEXT_DELTA"}),
        };
        let timeline = Timeline::from_events([&broken]);
        assert_eq!(timeline.entries(), &[TimelineEntry::Event(broken)]);
        assert_eq!(timeline.turns().count(), 0);
    }
}
