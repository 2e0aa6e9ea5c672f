//! Push-stream chunks: types, codec and record framing

pub mod codec;
pub mod framing;
pub mod types;

pub use codec::{decode, decode_value};
pub use framing::RecordFramer;
pub use types::{Chunk, ChunkBody, ChunkType, ToolCall, COMPLETION_SENTINEL};
