//! Error types for Turnstream
//!
//! This module defines all error types used throughout the session stream
//! engine, using `thiserror` for ergonomic error handling.
//!
//! Decode and persistence errors are contained at their own layer (logged and
//! dropped). Guard and transport errors are the only ones surfaced to callers.

use thiserror::Error;

/// Main error type for Turnstream operations
#[derive(Error, Debug)]
pub enum TurnstreamError {
    /// A single inbound record could not be decoded into a chunk
    #[error("Decode error: {0}")]
    Decode(String),

    /// The concurrency slot for this session or seat is already held
    #[error("Already streaming: {slot}")]
    AlreadyStreaming {
        /// Human-readable description of the contested slot
        slot: String,
    },

    /// The push-stream connection failed or dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// A local store write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No session with the given id is registered
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A submission conflicts with the session it targets
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// Export/import document is unusable
    #[error("Interchange error: {0}")]
    Interchange(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for Turnstream operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Use
/// `downcast_ref::<TurnstreamError>()` to recover the typed variant.
pub type Result<T> = anyhow::Result<T>;
