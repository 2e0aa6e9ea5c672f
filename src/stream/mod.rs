//! Streaming: concurrency slots, push-stream transports, and the per-turn
//! stream task

pub mod guard;
pub mod request;
pub mod session;
pub mod transport;

pub use guard::{ConcurrencyGuard, SlotKey, SlotTicket};
pub use request::{AgencyRequest, ChatMessage, TurnRequest, WorkflowRequest};
pub use session::{StreamMessage, StreamSession, StreamSignal};
pub use transport::{ChunkTransport, RecordStream};
