//! Stream and persistence metrics
//!
//! Recorded through the `metrics` facade. No exporter is installed by the
//! binary; embedders that install a recorder get these for free.
//!
//! # Metrics
//!
//! - `turnstream_chunks_decoded_total{type}`: Counter of decoded chunks
//! - `turnstream_decode_errors_total`: Counter of dropped records
//! - `turnstream_streams_active{target}`: Gauge of open stream sessions
//! - `turnstream_streams_closed_total{target, outcome}`: Counter of closed streams
//! - `turnstream_stream_failures_total{target}`: Counter of failed streams
//! - `turnstream_persistence_failures_total{op}`: Counter of failed writes
//!
//! # Examples
//!
//! ```
//! use turnstream::metrics::StreamMetrics;
//!
//! let metrics = StreamMetrics::new("persona");
//! metrics.record_done();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{decrement_gauge, increment_counter, increment_gauge};

use crate::chunk::ChunkType;

/// Lifecycle metrics for one stream session
///
/// Increments the active gauge on creation and decrements it exactly once,
/// on the first of `record_done`, `record_failure`, `record_cancelled`, or
/// drop.
#[derive(Debug)]
pub struct StreamMetrics {
    target: &'static str,
    recorded: AtomicBool,
}

impl StreamMetrics {
    pub fn new(target: &'static str) -> Self {
        increment_gauge!("turnstream_streams_active", 1.0, "target" => target);
        Self {
            target,
            recorded: AtomicBool::new(false),
        }
    }

    pub fn record_done(&self) {
        self.close("done");
    }

    pub fn record_failure(&self) {
        if self.close("failed") {
            increment_counter!("turnstream_stream_failures_total", "target" => self.target);
        }
    }

    pub fn record_cancelled(&self) {
        self.close("cancelled");
    }

    fn close(&self, outcome: &'static str) -> bool {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return false;
        }
        increment_counter!(
            "turnstream_streams_closed_total",
            "target" => self.target,
            "outcome" => outcome
        );
        decrement_gauge!("turnstream_streams_active", 1.0, "target" => self.target);
        true
    }

    pub fn target(&self) -> &str {
        self.target
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        self.record_cancelled();
    }
}

pub fn record_chunk_decoded(kind: ChunkType) {
    increment_counter!("turnstream_chunks_decoded_total", "type" => kind.as_str());
}

pub fn record_decode_error() {
    increment_counter!("turnstream_decode_errors_total");
}

pub fn record_persistence_failure(op: &'static str) {
    increment_counter!("turnstream_persistence_failures_total", "op" => op);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_metrics_close_once() {
        let metrics = StreamMetrics::new("persona");
        assert!(metrics.close("done"));
        assert!(!metrics.close("failed"));
        metrics.record_failure();
        assert_eq!(metrics.target(), "persona");
    }

    #[test]
    fn test_free_functions_without_recorder() {
        record_chunk_decoded(ChunkType::TextDelta);
        record_decode_error();
        record_persistence_failure("append_event");
    }
}
