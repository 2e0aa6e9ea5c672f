//! Stream session
//!
//! One [`StreamSession`] owns one push-stream for one turn. It runs as a
//! spawned task that opens the transport, decodes each record, and forwards
//! results to the engine's update channel in transport order:
//!
//! - every decoded chunk as [`StreamSignal::Chunk`]
//! - a closing chunk (`FINAL_MARKER`) or end of stream as [`StreamSignal::Done`]
//! - a connection failure or idle timeout as [`StreamSignal::Failed`]
//!
//! Undecodable records are logged and skipped; the stream stays open.
//! Exactly one of `Done` or `Failed` is sent, and nothing is sent after
//! it or after [`StreamSession::cancel`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chunk::{self, Chunk, ChunkBody};
use crate::error::TurnstreamError;
use crate::metrics::{self, StreamMetrics};
use crate::stream::guard::{SlotKey, SlotTicket};
use crate::stream::request::TurnRequest;
use crate::stream::transport::{ChunkTransport, RecordStream};

/// What a stream reports
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Chunk(Chunk),
    Done,
    Failed(String),
}

/// A signal tagged with the stream that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub ticket: SlotTicket,
    pub session_id: String,
    pub signal: StreamSignal,
}

/// Handle to a running stream task
///
/// Dropping the handle cancels the stream.
#[derive(Debug)]
pub struct StreamSession {
    ticket: SlotTicket,
    session_id: String,
    cancellation: CancellationToken,
    task: JoinHandle<()>,
    last_stream_id: Option<String>,
}

impl StreamSession {
    /// Spawn the stream task. Must be called within a tokio runtime.
    pub fn open(
        ticket: SlotTicket,
        session_id: String,
        request: TurnRequest,
        transport: Arc<dyn ChunkTransport>,
        updates: mpsc::UnboundedSender<StreamMessage>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let reader = StreamReader {
            ticket: ticket.clone(),
            session_id: session_id.clone(),
            updates,
            idle_timeout,
            cancellation: cancellation.clone(),
            metrics: StreamMetrics::new(match ticket.key {
                SlotKey::Persona { .. } => "persona",
                SlotKey::Seat { .. } => "agency",
            }),
        };

        tracing::info!("Opening stream for {} (ticket {})", ticket.key, ticket.id);
        let task = tokio::spawn(reader.run(request, transport));

        Self {
            ticket,
            session_id,
            cancellation,
            task,
            last_stream_id: None,
        }
    }

    /// Close the transport and stop delivery. Idempotent.
    pub fn cancel(&self) {
        if !self.cancellation.is_cancelled() && !self.task.is_finished() {
            tracing::info!("Cancelling stream for {} (ticket {})", self.ticket.key, self.ticket.id);
        }
        self.stop();
    }

    fn stop(&self) {
        self.cancellation.cancel();
        self.task.abort();
    }

    pub fn ticket(&self) -> &SlotTicket {
        &self.ticket
    }

    /// Give a final marker without a stream id the last stream id seen on
    /// this stream, so it closes that turn instead of standing alone.
    pub fn attribute(&mut self, chunk: &mut Chunk) {
        match chunk.stream_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.last_stream_id = Some(id.to_string()),
            None if matches!(chunk.body, ChunkBody::FinalMarker) => {
                chunk.stream_id = self.last_stream_id.clone();
            }
            None => {}
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamReader {
    ticket: SlotTicket,
    session_id: String,
    updates: mpsc::UnboundedSender<StreamMessage>,
    idle_timeout: Option<Duration>,
    cancellation: CancellationToken,
    metrics: StreamMetrics,
}

enum Next {
    Record(Option<chunk::framing::FramedRecord>),
    Idle,
}

impl StreamReader {
    async fn run(self, request: TurnRequest, transport: Arc<dyn ChunkTransport>) {
        let opened = tokio::select! {
            biased;

            _ = self.cancellation.cancelled() => {
                self.metrics.record_cancelled();
                return;
            }

            opened = transport.open(&request) => opened,
        };

        let mut records = match opened {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Stream for {} failed to open: {}", self.ticket.key, e);
                self.fail(transport_message(&e));
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => {
                    self.metrics.record_cancelled();
                    return;
                }

                next = next_record(&mut records, self.idle_timeout) => next,
            };

            match next {
                Next::Idle => {
                    tracing::error!(
                        "Stream for {} was silent for {:?}; giving up",
                        self.ticket.key,
                        self.idle_timeout.unwrap_or_default()
                    );
                    self.fail("idle timeout".to_string());
                    return;
                }
                Next::Record(None) => {
                    tracing::info!("Stream for {} reached end of stream", self.ticket.key);
                    self.finish();
                    return;
                }
                Next::Record(Some(Err(TurnstreamError::Decode(reason)))) => {
                    tracing::warn!("Dropping unframeable record on {}: {}", self.ticket.key, reason);
                    metrics::record_decode_error();
                }
                Next::Record(Some(Err(TurnstreamError::Transport(message)))) => {
                    tracing::error!("Stream for {} dropped: {}", self.ticket.key, message);
                    self.fail(message);
                    return;
                }
                Next::Record(Some(Err(e))) => {
                    tracing::error!("Stream for {} dropped: {}", self.ticket.key, e);
                    self.fail(e.to_string());
                    return;
                }
                Next::Record(Some(Ok(raw))) => match chunk::decode(&raw) {
                    Ok(chunk) => {
                        tracing::debug!(
                            "Chunk {} on {} (stream {})",
                            chunk.chunk_type(),
                            self.ticket.key,
                            chunk.stream_id.as_deref().unwrap_or("-")
                        );
                        metrics::record_chunk_decoded(chunk.chunk_type());
                        let closes = chunk.closes_stream();
                        if !self.send(StreamSignal::Chunk(chunk)) {
                            return;
                        }
                        if closes {
                            tracing::info!("Stream for {} closed by final marker", self.ticket.key);
                            self.finish();
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Dropping record on {}: {}", self.ticket.key, e);
                        metrics::record_decode_error();
                    }
                },
            }
        }
    }

    fn finish(&self) {
        self.metrics.record_done();
        self.send(StreamSignal::Done);
    }

    fn fail(&self, message: String) {
        self.metrics.record_failure();
        self.send(StreamSignal::Failed(message));
    }

    /// Returns false once the engine side is gone.
    fn send(&self, signal: StreamSignal) -> bool {
        if self.cancellation.is_cancelled() {
            return false;
        }
        self.updates
            .send(StreamMessage {
                ticket: self.ticket.clone(),
                session_id: self.session_id.clone(),
                signal,
            })
            .is_ok()
    }
}

async fn next_record(records: &mut RecordStream, idle_timeout: Option<Duration>) -> Next {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, records.next()).await {
            Ok(record) => Next::Record(record),
            Err(_) => Next::Idle,
        },
        None => Next::Record(records.next().await),
    }
}

/// Strip the variant prefix from transport errors for the user-facing log.
fn transport_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<TurnstreamError>() {
        Some(TurnstreamError::Transport(message)) => message.clone(),
        _ => error.to_string(),
    }
}
