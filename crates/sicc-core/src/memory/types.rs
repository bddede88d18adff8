//! Memory Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A remembered piece of conversation text with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    /// L2-normalized embedding of `content`
    pub embedding: Vec<f32>,
    /// Current relevance in `[0, 1]`; drives eviction
    pub relevance: f64,
    /// Relevance at creation, the base that decay works from
    pub initial_relevance: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Options for [`MemoryService::remember`](super::MemoryService::remember)
#[derive(Debug, Clone, Default)]
pub struct RememberOptions {
    pub metadata: BTreeMap<String, Value>,
    /// Overrides the configured default relevance
    pub relevance: Option<f64>,
}

impl RememberOptions {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }
}

/// Row filters applied before similarity ranking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilters {
    /// Only memories of this conversation
    pub conversation_id: Option<String>,
    /// Skip memories of this conversation
    pub exclude_conversation_id: Option<String>,
    /// Skip memories whose stored relevance is below this
    pub min_relevance: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
}

impl MemoryFilters {
    pub fn for_conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            ..Default::default()
        }
    }

    pub fn excluding_conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            exclude_conversation_id: Some(conversation_id.into()),
            ..Default::default()
        }
    }

    /// Check a memory against every filter; soft-deleted memories never match
    pub fn matches(&self, memory: &Memory) -> bool {
        if memory.is_deleted() {
            return false;
        }
        if let Some(id) = &self.conversation_id {
            if &memory.conversation_id != id {
                return false;
            }
        }
        if let Some(id) = &self.exclude_conversation_id {
            if &memory.conversation_id == id {
                return false;
            }
        }
        if let Some(min) = self.min_relevance {
            if memory.relevance < min {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if memory.created_at <= after {
                return false;
            }
        }
        true
    }
}

/// Weights of the lexical and vector halves of a hybrid search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub text_weight: f64,
    pub vector_weight: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            text_weight: 0.3,
            vector_weight: 0.7,
        }
    }
}

/// A memory matched by a search, with its scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub memory: Memory,
    /// Sort key of the search that produced this hit
    pub relevance_score: f64,
    pub vector_score: f64,
    pub text_score: f64,
}

/// Context assembled for a conversation turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    pub conversation_id: String,
    pub memories: Vec<MemoryHit>,
    pub local_count: usize,
    pub global_count: usize,
    /// Set when retrieval was cut short and `memories` is incomplete
    pub degraded: bool,
    pub error: Option<String>,
}

impl MemoryContext {
    pub fn degraded(conversation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            degraded: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Memory store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub live_memories: usize,
    pub deleted_memories: usize,
    pub conversations: usize,
    pub mean_relevance: f64,
}
