//! Conversation Memory
//!
//! Short and long-lived memories of conversation turns, each carrying an
//! embedding and a relevance score:
//!
//! - **remember**: embed and store a turn, then enforce the per-conversation cap
//! - **search**: vector or hybrid (lexical + vector) similarity search
//! - **context**: up to 3 local + 2 global memories for the current turn
//! - **maintenance**: retention sweep, relevance decay, soft deletion

pub mod embeddings;
mod service;
mod types;

pub use embeddings::{EMBEDDING_DIMENSIONS, Embedder, HashingEmbedder};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use service::MemoryService;
pub use types::*;
