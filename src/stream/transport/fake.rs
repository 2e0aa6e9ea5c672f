//! In-process fake transport for stream and engine tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Every `open()` on the transport creates a fresh record channel and
//! hands the request plus the sending half to the handle, so the test plays
//! the orchestration engine:
//!
//! ```text
//! engine open(request) --> opened_tx --> handle.next_open() -> FakeStream
//! FakeStream::send(record) --------> records_rx (the RecordStream)
//! FakeStream dropped       --------> stream EOF
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChunkTransport, RecordStream};
use crate::chunk::framing::FramedRecord;
use crate::error::{Result, TurnstreamError};
use crate::stream::request::TurnRequest;

/// Fake [`ChunkTransport`] backed by channels
#[derive(Debug)]
pub struct FakeTransport {
    opened_tx: mpsc::UnboundedSender<FakeStream>,
    fail_next_open: Arc<AtomicBool>,
}

/// Test side of a [`FakeTransport`]
#[derive(Debug)]
pub struct FakeTransportHandle {
    opened_rx: Mutex<mpsc::UnboundedReceiver<FakeStream>>,
    fail_next_open: Arc<AtomicBool>,
}

/// One opened push-stream, seen from the engine's side of the wire
#[derive(Debug)]
pub struct FakeStream {
    pub request: TurnRequest,
    records_tx: mpsc::UnboundedSender<FramedRecord>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeTransportHandle) {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let fail_next_open = Arc::new(AtomicBool::new(false));
        (
            Self {
                opened_tx,
                fail_next_open: Arc::clone(&fail_next_open),
            },
            FakeTransportHandle {
                opened_rx: Mutex::new(opened_rx),
                fail_next_open,
            },
        )
    }
}

#[async_trait::async_trait]
impl ChunkTransport for FakeTransport {
    async fn open(&self, request: &TurnRequest) -> Result<RecordStream> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TurnstreamError::Transport("connection refused".to_string()).into());
        }
        let (records_tx, records_rx) = mpsc::unbounded_channel();
        self.opened_tx
            .send(FakeStream {
                request: request.clone(),
                records_tx,
            })
            .map_err(|_| TurnstreamError::Transport("fake handle dropped".to_string()))?;
        Ok(Box::pin(UnboundedReceiverStream::new(records_rx)))
    }
}

impl FakeTransportHandle {
    /// Wait for the next `open()` call.
    pub async fn next_open(&self) -> FakeStream {
        self.opened_rx
            .lock()
            .await
            .recv()
            .await
            .expect("fake transport dropped")
    }

    /// Make the next `open()` fail with a transport error.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }
}

impl FakeStream {
    /// Push a raw record. Returns false once the reader is gone.
    pub fn send_raw(&self, record: impl Into<String>) -> bool {
        self.records_tx.send(Ok(record.into())).is_ok()
    }

    pub fn send(&self, chunk: Value) -> bool {
        self.send_raw(chunk.to_string())
    }

    /// Drop the connection with a transport error.
    pub fn fail(&self, message: &str) -> bool {
        self.records_tx
            .send(Err(TurnstreamError::Transport(message.to_string())))
            .is_ok()
    }

    /// Whether the reading side has gone away (stream cancelled).
    pub fn is_closed(&self) -> bool {
        self.records_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::request::ChatMessage;
    use futures::StreamExt;

    fn request() -> TurnRequest {
        TurnRequest {
            session_id: "s1".to_string(),
            persona_id: Some("p1".to_string()),
            agency_request: None,
            messages: vec![ChatMessage::user("Hi")],
            workflow_request: None,
        }
    }

    #[tokio::test]
    async fn test_records_flow_to_opened_stream() {
        let (transport, handle) = FakeTransport::new();
        let mut records = transport.open(&request()).await.expect("open");
        let remote = handle.next_open().await;
        assert_eq!(remote.request.session_id, "s1");

        assert!(remote.send_raw("{}"));
        drop(remote);
        assert_eq!(records.next().await.unwrap().unwrap(), "{}");
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_next_open() {
        let (transport, handle) = FakeTransport::new();
        handle.fail_next_open();
        assert!(transport.open(&request()).await.is_err());
        assert!(transport.open(&request()).await.is_ok());
    }
}
