//! Turnstream - client-side session stream engine
//!
//! This library turns the chunked push-stream of an agent orchestration
//! engine into durable, per-session conversation state: decoded chunks are
//! folded into turns, concurrent streams are fenced per persona session or
//! agency seat, and every session is mirrored into a local SQLite database.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `chunk`: Chunk types, the chunk codec, and push-stream record framing
//! - `turn`: Folding chunks into turns, and the session timeline
//! - `stream`: Concurrency guard, transports, and the per-turn stream task
//! - `session`: Session model, in-memory store, and export/import
//! - `persistence`: Background mirror of the store into `storage`
//! - `storage`: SQLite tables for sessions, events, and telemetry
//! - `engine`: `SessionEngine`, which ties the pieces together
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstream::engine::{EngineOptions, EngineUpdate, SessionEngine, Submission};
//! use turnstream::persistence::PersistenceBridge;
//! use turnstream::stream::transport::http::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let base = url::Url::parse("http://localhost:3001/api/agentos")?;
//!     let transport = HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(30))?;
//!     let persistence = PersistenceBridge::open(None, 500)?;
//!
//!     let mut engine = SessionEngine::new(Arc::new(transport), Some(persistence), EngineOptions::default());
//!     engine.bootstrap().await?;
//!
//!     let submitted = engine.submit(Submission::persona("researcher", "Summarize the report"))?;
//!     while let Some(update) = engine.next_update().await {
//!         if let EngineUpdate::StreamClosed { .. } = update {
//!             break;
//!         }
//!     }
//!     if let Some(timeline) = engine.timeline(&submitted.session_id) {
//!         for turn in timeline.turns() {
//!             println!("{}", turn.text);
//!         }
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod session;
pub mod storage;
pub mod stream;
pub mod turn;

// Re-export commonly used types
pub use chunk::{Chunk, ChunkBody, ChunkType};
pub use config::Config;
pub use engine::{EngineUpdate, SessionEngine, Submission, SubmitTarget};
pub use error::{Result, TurnstreamError};
pub use persistence::PersistenceBridge;
pub use session::{Session, SessionEvent, SessionStatus, SessionStore};
pub use stream::{ConcurrencyGuard, SlotKey};
pub use turn::{Timeline, Turn};
