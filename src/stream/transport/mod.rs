//! Push-stream transport abstraction
//!
//! A [`ChunkTransport`] opens one push-stream per turn and yields its raw
//! records. Framing is the transport's job; decoding is not.
//!
//! - [`http::HttpTransport`] -- POSTs the turn request and frames the
//!   response body (NDJSON or SSE).
//! - [`fake::FakeTransport`] -- in-process channels (cfg(test) only).
//!
//! Record items are `Err(TurnstreamError::Decode(_))` when a single record
//! could not be framed (the stream goes on) and any other error when the
//! connection itself failed (the stream ends).

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::chunk::framing::{FramedRecord, RecordFramer};
use crate::error::{Result, TurnstreamError};
use crate::stream::request::TurnRequest;

/// Stream of raw records from one push-stream connection.
pub type RecordStream = Pin<Box<dyn Stream<Item = FramedRecord> + Send>>;

/// Opens push-streams for turn requests.
#[async_trait::async_trait]
pub trait ChunkTransport: Send + Sync + std::fmt::Debug {
    /// Open a push-stream for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`TurnstreamError::Transport`] if the connection cannot be
    /// established.
    async fn open(&self, request: &TurnRequest) -> Result<RecordStream>;
}

pub mod http;

#[cfg(test)]
pub mod fake;

/// Frame a byte stream into records.
///
/// A read error ends the stream with a [`TurnstreamError::Transport`] item;
/// a trailing unterminated record is flushed when the bytes run out.
pub fn frame_records<S, E>(bytes: S) -> RecordStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        framer: RecordFramer,
        pending: VecDeque<FramedRecord>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        framer: RecordFramer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.pending.pop_front() {
                return Some((record, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let records = state.framer.push(&chunk);
                    state.pending.extend(records);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(TurnstreamError::Transport(format!(
                        "stream read failed: {}",
                        e
                    ))));
                }
                None => {
                    state.finished = true;
                    while let Some(record) = state.framer.finish() {
                        state.pending.push_back(record);
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_records_across_byte_boundaries() {
        let parts: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"a\":")),
            Ok(Bytes::from_static(b"1}\n{\"b\"")),
            Ok(Bytes::from_static(b":2}")),
        ];
        let records: Vec<FramedRecord> = frame_records(futures::stream::iter(parts)).collect().await;
        let records: Vec<String> = records.into_iter().map(|r| r.expect("record")).collect();
        assert_eq!(records, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_frame_records_read_error_ends_stream() {
        let parts: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"{\"never\":1}\n")),
        ];
        let records: Vec<FramedRecord> = frame_records(futures::stream::iter(parts)).collect().await;
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[1],
            Err(TurnstreamError::Transport(msg)) if msg.contains("connection reset")
        ));
    }
}
