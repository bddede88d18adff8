//! Memory Service
//!
//! High-level interface over the store: embedding, validation, context
//! assembly, eviction and decay.

use chrono::{Duration, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{
    Embedder, HybridWeights, Memory, MemoryContext, MemoryFilters, MemoryHit, MemoryStats,
    RememberOptions,
};
use crate::config::{MemoryConfig, TimeoutConfig};
use crate::error::{SiccError, SiccResult};
use crate::store::{RetryPolicy, SiccStore, with_retry, with_timeout};
use crate::utils::{validate_finite, validate_limit, validate_non_empty, validate_unit_interval};

/// Largest page a similarity search may request
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Memory store facade
pub struct MemoryService {
    store: Arc<dyn SiccStore>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
    timeouts: TimeoutConfig,
    retry: RetryPolicy,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn SiccStore>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
        timeouts: TimeoutConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            timeouts,
            retry,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Embed text under the embedding budget and check the vector's shape
    async fn embed(&self, text: &str) -> SiccResult<Vec<f32>> {
        let vector = with_timeout(
            self.timeouts.embedding(),
            "embedding",
            self.embedder.embed(text),
        )
        .await?;

        if vector.len() != self.config.embedding_dimensions {
            return Err(SiccError::Other(anyhow::anyhow!(
                "embedder returned {} dimensions, expected {}",
                vector.len(),
                self.config.embedding_dimensions
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(SiccError::Other(anyhow::anyhow!(
                "embedder returned non-finite components"
            )));
        }
        Ok(vector)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Write path
    // ─────────────────────────────────────────────────────────────────────

    /// Store a conversation turn as a memory
    ///
    /// The per-conversation cap from config is enforced afterwards, so the
    /// new memory itself may be evicted if it is the least relevant.
    pub async fn remember(
        &self,
        conversation_id: &str,
        text: &str,
        options: RememberOptions,
    ) -> SiccResult<Memory> {
        validate_non_empty("conversation_id", conversation_id)?;
        validate_non_empty("text", text)?;
        let relevance = options.relevance.unwrap_or(self.config.default_relevance);
        validate_unit_interval("relevance", relevance)?;

        let embedding = self.embed(text).await?;
        let memory = Memory {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: text.to_string(),
            embedding,
            relevance,
            initial_relevance: relevance,
            metadata: options.metadata,
            created_at: Utc::now(),
            deleted_at: None,
        };

        let store = &self.store;
        let row = &memory;
        with_retry(&self.retry, "insert_memory", move || store.insert_memory(row)).await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            memory_id = %memory.id,
            "Stored memory"
        );

        self.enforce_per_conversation_cap(conversation_id, self.config.max_memories_per_conversation)
            .await?;

        Ok(memory)
    }

    /// Soft-delete a memory; it stays in the store but is invisible to reads
    pub async fn forget(&self, memory_id: &str) -> SiccResult<()> {
        validate_non_empty("memory_id", memory_id)?;

        let store = &self.store;
        let deleted = with_retry(&self.retry, "soft_delete_memory", move || {
            store.soft_delete_memory(memory_id, Utc::now())
        })
        .await?;

        if !deleted {
            return Err(SiccError::not_found("Memory", memory_id));
        }
        tracing::debug!(memory_id = %memory_id, "Forgot memory");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read path
    // ─────────────────────────────────────────────────────────────────────

    /// Vector similarity search; scores are non-increasing
    pub async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&MemoryFilters>,
    ) -> SiccResult<Vec<MemoryHit>> {
        validate_non_empty("query", query)?;
        validate_limit("limit", limit, 1, MAX_SEARCH_LIMIT)?;

        let embedding = self.embed(query).await?;
        let default_filters = MemoryFilters::default();
        let filters = filters.unwrap_or(&default_filters);

        let store = &self.store;
        let embedding = &embedding;
        with_retry(&self.retry, "search_similar_memories", move || {
            store.search_similar_memories(embedding, limit, filters)
        })
        .await
    }

    /// Weighted lexical + vector search; the combined score is the sort key
    pub async fn search_hybrid(
        &self,
        query: &str,
        limit: usize,
        text_weight: f64,
        vector_weight: f64,
    ) -> SiccResult<Vec<MemoryHit>> {
        validate_non_empty("query", query)?;
        validate_limit("limit", limit, 1, MAX_SEARCH_LIMIT)?;
        validate_finite("text_weight", text_weight)?;
        validate_finite("vector_weight", vector_weight)?;
        if text_weight < 0.0 || vector_weight < 0.0 {
            return Err(SiccError::validation(
                "weights",
                format!(
                    "must not be negative (got text_weight={}, vector_weight={})",
                    text_weight, vector_weight
                ),
            ));
        }
        if text_weight + vector_weight == 0.0 {
            return Err(SiccError::validation("weights", "must not both be zero"));
        }

        let embedding = self.embed(query).await?;
        let weights = HybridWeights {
            text_weight,
            vector_weight,
        };
        let filters = MemoryFilters::default();

        let store = &self.store;
        let embedding = &embedding;
        let filters = &filters;
        with_retry(&self.retry, "search_memories_hybrid", move || {
            store.search_memories_hybrid(query, embedding, limit, weights, filters)
        })
        .await
    }

    /// Up to `local_context_limit` memories of this conversation plus
    /// `global_context_limit` from others, merged by relevance
    ///
    /// An embedding timeout yields a degraded, empty context instead of an
    /// error so the turn can continue.
    pub async fn get_relevant_context(
        &self,
        conversation_id: &str,
        current_message: &str,
    ) -> SiccResult<MemoryContext> {
        validate_non_empty("conversation_id", conversation_id)?;
        validate_non_empty("current_message", current_message)?;

        let embedding = match self.embed(current_message).await {
            Ok(embedding) => embedding,
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Context retrieval degraded: embedding timed out"
                );
                return Ok(MemoryContext::degraded(conversation_id, e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let store = &self.store;
        let embedding = &embedding;

        let local_filters = MemoryFilters::for_conversation(conversation_id);
        let local_filters = &local_filters;
        let local_limit = self.config.local_context_limit;
        let local = with_retry(&self.retry, "search_similar_memories", move || {
            store.search_similar_memories(embedding, local_limit, local_filters)
        })
        .await?;

        let global_filters = MemoryFilters::excluding_conversation(conversation_id);
        let global_filters = &global_filters;
        let global_limit = self.config.global_context_limit;
        let global = with_retry(&self.retry, "search_similar_memories", move || {
            store.search_similar_memories(embedding, global_limit, global_filters)
        })
        .await?;

        let min = self.config.min_context_similarity;
        let local: Vec<MemoryHit> = local.into_iter().filter(|h| h.relevance_score >= min).collect();
        let global: Vec<MemoryHit> = global.into_iter().filter(|h| h.relevance_score >= min).collect();

        let local_count = local.len();
        let global_count = global.len();

        let mut memories = local;
        memories.extend(global);
        // Stable: equal scores keep local hits ahead of global ones
        memories.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });

        Ok(MemoryContext {
            conversation_id: conversation_id.to_string(),
            memories,
            local_count,
            global_count,
            degraded: false,
            error: None,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Eviction & maintenance
    // ─────────────────────────────────────────────────────────────────────

    /// Hard-delete memories older than `retention_days` whose relevance is
    /// below the cleanup threshold. Newer memories are never touched.
    pub async fn cleanup_old_memories(&self, retention_days: i64) -> SiccResult<usize> {
        if retention_days < 0 {
            return Err(SiccError::validation(
                "retention_days",
                format!("must not be negative (got {})", retention_days),
            ));
        }

        let cutoff = Utc::now() - Duration::days(retention_days);
        let threshold = self.config.cleanup_relevance_threshold;

        let store = &self.store;
        let memories = with_retry(&self.retry, "list_memories", move || store.list_memories(None)).await?;

        let expired: Vec<String> = memories
            .into_iter()
            .filter(|m| m.created_at < cutoff && m.relevance < threshold)
            .map(|m| m.id)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let ids = &expired;
        let removed = with_retry(&self.retry, "delete_memories", move || store.delete_memories(ids)).await?;

        tracing::info!(
            removed,
            retention_days,
            relevance_threshold = threshold,
            "Cleaned up old memories"
        );
        Ok(removed)
    }

    /// Evict the excess of a conversation's live memories, least relevant
    /// first and oldest first among equals; returns the number evicted
    pub async fn enforce_per_conversation_cap(
        &self,
        conversation_id: &str,
        max: usize,
    ) -> SiccResult<usize> {
        validate_non_empty("conversation_id", conversation_id)?;
        if max == 0 {
            return Err(SiccError::validation("max", "must be at least 1 (got 0)"));
        }

        let store = &self.store;
        let mut memories = with_retry(&self.retry, "list_memories", move || {
            store.list_memories(Some(conversation_id))
        })
        .await?;

        if memories.len() <= max {
            return Ok(0);
        }

        memories.sort_by(|a, b| {
            a.relevance
                .partial_cmp(&b.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let excess = memories.len() - max;
        let evict: Vec<String> = memories.into_iter().take(excess).map(|m| m.id).collect();

        let ids = &evict;
        let removed = with_retry(&self.retry, "delete_memories", move || store.delete_memories(ids)).await?;

        tracing::info!(
            conversation_id = %conversation_id,
            evicted = removed,
            max,
            "Enforced per-conversation memory cap"
        );
        Ok(removed)
    }

    /// Re-score live memories as `initial * 0.5^(age / half_life)`
    ///
    /// Decay is computed from each memory's initial relevance, so repeated
    /// runs do not compound. Returns the number of memories updated.
    pub async fn decay_relevance(&self, half_life_days: f64) -> SiccResult<usize> {
        validate_finite("half_life_days", half_life_days)?;
        if half_life_days <= 0.0 {
            return Err(SiccError::validation(
                "half_life_days",
                format!("must be greater than 0 (got {})", half_life_days),
            ));
        }

        let store = &self.store;
        let memories = with_retry(&self.retry, "list_memories", move || store.list_memories(None)).await?;
        let now = Utc::now();
        let mut updated = 0;

        for memory in memories {
            let age_days = (now - memory.created_at).num_seconds().max(0) as f64 / 86_400.0;
            let decayed = (memory.initial_relevance * 0.5f64.powf(age_days / half_life_days))
                .clamp(0.0, 1.0);

            if (decayed - memory.relevance).abs() > 1e-9 {
                let id = memory.id.as_str();
                with_retry(&self.retry, "update_memory_relevance", move || {
                    store.update_memory_relevance(id, decayed)
                })
                .await?;
                updated += 1;
            }
        }

        if updated > 0 {
            tracing::debug!(updated, half_life_days, "Decayed memory relevance");
        }
        Ok(updated)
    }

    /// Counts of live and soft-deleted memories
    pub async fn stats(&self) -> SiccResult<MemoryStats> {
        let store = &self.store;
        let memories = with_retry(&self.retry, "list_memories", move || store.list_memories(None)).await?;
        let deleted = with_retry(&self.retry, "count_deleted_memories", move || {
            store.count_deleted_memories()
        })
        .await?;

        let conversations: BTreeSet<&str> =
            memories.iter().map(|m| m.conversation_id.as_str()).collect();
        let mean_relevance = if memories.is_empty() {
            0.0
        } else {
            memories.iter().map(|m| m.relevance).sum::<f64>() / memories.len() as f64
        };

        Ok(MemoryStats {
            live_memories: memories.len(),
            deleted_memories: deleted,
            conversations: conversations.len(),
            mean_relevance,
        })
    }
}
