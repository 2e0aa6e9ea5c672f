//! Record framing for the push-stream
//!
//! The orchestration engine delivers chunks either as newline-delimited JSON
//! or as server-sent events. [`RecordFramer`] accepts both: it buffers raw
//! bytes across network reads and yields records as they complete.
//!
//! - Plain lines are records as-is (NDJSON).
//! - `data:` lines collect until the blank line ending the event, and the
//!   event's record is their values joined with `\n`.
//! - `event:`, `id:` and `retry:` fields and `:` comments are skipped.

use crate::error::TurnstreamError;

/// One framed record, or a framing failure for that record only.
pub type FramedRecord = Result<String, TurnstreamError>;

/// Incremental line framer
#[derive(Debug, Default)]
pub struct RecordFramer {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the network and return every record completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FramedRecord> {
        self.buffer.extend_from_slice(bytes);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(record) = self.frame_line(&line[..line.len() - 1]) {
                records.push(record);
            }
        }
        records
    }

    /// Flush a trailing record that was not terminated.
    pub fn finish(&mut self) -> Option<FramedRecord> {
        let line = std::mem::take(&mut self.buffer);
        let record = if line.is_empty() {
            None
        } else {
            self.frame_line(&line)
        };
        record.or_else(|| self.dispatch())
    }

    /// Bytes buffered while waiting for the end of a line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn frame_line(&mut self, line: &[u8]) -> Option<FramedRecord> {
        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(e) => {
                return Some(Err(TurnstreamError::Decode(format!(
                    "record is not valid UTF-8: {}",
                    e
                ))))
            }
        };

        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
            return None;
        }

        if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
            return None;
        }

        Some(Ok(line.trim().to_string()))
    }

    /// End the current SSE event, yielding its data if it has any.
    fn dispatch(&mut self) -> Option<FramedRecord> {
        if self.data.is_empty() {
            return None;
        }
        let record = std::mem::take(&mut self.data).join("\n");
        let record = record.trim();
        (!record.is_empty()).then(|| Ok(record.to_string()))
    }
}
