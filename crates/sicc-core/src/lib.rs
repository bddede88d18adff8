//! sicc-core - Self-Improving Conversational Cache
//!
//! Learns reusable trigger → response patterns from finished conversations
//! and serves them back on live turns:
//!
//! - **memory**: embedded conversation memories with vector/hybrid search
//! - **learning**: clustering conversations into patterns
//! - **supervisor**: conflict detection and confidence-gated admission
//! - **agents**: routing admitted patterns to specialised sub-agents
//! - **behavior**: ranking and applying patterns to a request
//! - **metrics**: performance samples and the intelligence report
//! - **service**: the facade tying the above to a store and an embedder

pub mod agents;
pub mod behavior;
pub mod config;
pub mod error;
pub mod learning;
pub mod memory;
pub mod metrics;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use agents::{SubAgentConfig, SubAgentType, SubAgentUpdate};
pub use config::SiccConfig;
pub use error::{SiccError, SiccResult};
pub use learning::Pattern;
pub use service::{MaintenanceWorker, SiccService, TurnOutcome, TurnStatus};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{InMemoryStore, SiccStore};
pub use types::{ConversationContext, ConversationOutcome, ConversationRecord, Message};
