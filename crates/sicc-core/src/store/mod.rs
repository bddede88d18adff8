//! Persistence
//!
//! [`SiccStore`] is the row store every component persists through. Two
//! backends ship with the crate:
//!
//! - [`InMemoryStore`]: tokio `RwLock`ed maps, used by tests and ephemeral runs
//! - [`SqliteStore`] (feature `sqlite`): a single SQLite file in WAL mode
//!
//! Vector search is computed in-process by [`rank_by_vector`] and
//! [`rank_hybrid`] so both backends score identically.

mod memory;
mod retry;
#[cfg(feature = "sqlite")]
mod migrations;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
pub use retry::{RetryPolicy, with_retry, with_timeout};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::agents::PatternAssignment;
use crate::error::SiccResult;
use crate::learning::Pattern;
use crate::memory::embeddings::cosine_similarity;
use crate::memory::{HybridWeights, Memory, MemoryFilters, MemoryHit};
use crate::metrics::PerformanceMetric;
use crate::supervisor::ApprovalDecision;
use crate::types::ConversationRecord;
use crate::utils::tokenize;

/// Async row store used by every SICC component
#[async_trait]
pub trait SiccStore: Send + Sync {
    // ── Memories ──────────────────────────────────────────────────────────

    async fn insert_memory(&self, memory: &Memory) -> SiccResult<()>;

    /// Fetch a memory, soft-deleted or not
    async fn get_memory(&self, id: &str) -> SiccResult<Option<Memory>>;

    /// Live memories, optionally scoped to one conversation
    async fn list_memories(&self, conversation_id: Option<&str>) -> SiccResult<Vec<Memory>>;

    /// Mark a live memory deleted; false when absent or already deleted
    async fn soft_delete_memory(&self, id: &str, at: DateTime<Utc>) -> SiccResult<bool>;

    /// Remove memories permanently; returns how many existed
    async fn delete_memories(&self, ids: &[String]) -> SiccResult<usize>;

    async fn update_memory_relevance(&self, id: &str, relevance: f64) -> SiccResult<bool>;

    async fn count_deleted_memories(&self) -> SiccResult<usize>;

    /// Live memories ranked by cosine similarity to `embedding`
    async fn search_similar_memories(
        &self,
        embedding: &[f32],
        max_results: usize,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>>;

    /// Live memories ranked by a weighted lexical + vector score
    async fn search_memories_hybrid(
        &self,
        query_text: &str,
        embedding: &[f32],
        max_results: usize,
        weights: HybridWeights,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>>;

    // ── Patterns ──────────────────────────────────────────────────────────

    /// Insert or replace a pattern, bumping its version; returns the stored row
    async fn upsert_pattern(&self, pattern: &Pattern) -> SiccResult<Pattern>;

    async fn get_pattern(&self, id: &str) -> SiccResult<Option<Pattern>>;

    async fn list_patterns(&self) -> SiccResult<Vec<Pattern>>;

    // ── Assignments ───────────────────────────────────────────────────────

    /// Insert or replace the assignment keyed by its pattern id
    async fn upsert_assignment(&self, assignment: &PatternAssignment) -> SiccResult<()>;

    async fn list_assignments(&self) -> SiccResult<Vec<PatternAssignment>>;

    // ── Approval decisions ────────────────────────────────────────────────

    async fn append_decision(&self, decision: &ApprovalDecision) -> SiccResult<()>;

    async fn list_decisions(&self, pattern_id: Option<&str>) -> SiccResult<Vec<ApprovalDecision>>;

    // ── Metrics ───────────────────────────────────────────────────────────

    async fn append_metric(&self, metric: &PerformanceMetric) -> SiccResult<()>;

    /// Every recorded metric, oldest first
    async fn list_metrics(&self) -> SiccResult<Vec<PerformanceMetric>>;

    // ── Conversations ─────────────────────────────────────────────────────

    /// Insert or replace a conversation record keyed by its id
    async fn save_conversation(&self, record: &ConversationRecord) -> SiccResult<()>;

    async fn list_conversations(&self) -> SiccResult<Vec<ConversationRecord>>;

    /// Drop every row
    async fn clear(&self) -> SiccResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared scoring
// ─────────────────────────────────────────────────────────────────────────────

/// Rank memories by cosine similarity (clamped to `[0, 1]`)
pub fn rank_by_vector(
    memories: impl IntoIterator<Item = Memory>,
    embedding: &[f32],
    max_results: usize,
    filters: &MemoryFilters,
) -> Vec<MemoryHit> {
    let hits = memories
        .into_iter()
        .filter(|m| filters.matches(m))
        .map(|memory| {
            let vector_score = cosine_similarity(&memory.embedding, embedding).clamp(0.0, 1.0);
            MemoryHit {
                memory,
                relevance_score: vector_score,
                vector_score,
                text_score: 0.0,
            }
        })
        .collect();

    sort_and_truncate(hits, max_results)
}

/// Rank memories by `text_weight * lexical + vector_weight * cosine`,
/// normalised by the weight sum
pub fn rank_hybrid(
    memories: impl IntoIterator<Item = Memory>,
    query_text: &str,
    embedding: &[f32],
    max_results: usize,
    weights: HybridWeights,
    filters: &MemoryFilters,
) -> Vec<MemoryHit> {
    let query_tokens = tokenize(query_text);
    let weight_sum = weights.text_weight + weights.vector_weight;

    let hits = memories
        .into_iter()
        .filter(|m| filters.matches(m))
        .map(|memory| {
            let vector_score = cosine_similarity(&memory.embedding, embedding).clamp(0.0, 1.0);
            let text_score = if query_tokens.is_empty() {
                0.0
            } else {
                let content = tokenize(&memory.content);
                query_tokens.intersection(&content).count() as f64 / query_tokens.len() as f64
            };
            let combined = if weight_sum > 0.0 {
                (weights.text_weight * text_score + weights.vector_weight * vector_score)
                    / weight_sum
            } else {
                0.0
            };
            MemoryHit {
                memory,
                relevance_score: combined.clamp(0.0, 1.0),
                vector_score,
                text_score,
            }
        })
        .collect();

    sort_and_truncate(hits, max_results)
}

/// Score descending, then newest first, then id
fn sort_and_truncate(mut hits: Vec<MemoryHit>, max_results: usize) -> Vec<MemoryHit> {
    hits.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    hits.truncate(max_results);
    hits
}
