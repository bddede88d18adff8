//! In-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{SiccStore, rank_by_vector, rank_hybrid};
use crate::agents::PatternAssignment;
use crate::error::SiccResult;
use crate::learning::Pattern;
use crate::memory::{HybridWeights, Memory, MemoryFilters, MemoryHit};
use crate::metrics::PerformanceMetric;
use crate::supervisor::ApprovalDecision;
use crate::types::ConversationRecord;

#[derive(Default)]
struct Tables {
    memories: BTreeMap<String, Memory>,
    patterns: BTreeMap<String, Pattern>,
    assignments: BTreeMap<String, PatternAssignment>,
    decisions: Vec<ApprovalDecision>,
    metrics: Vec<PerformanceMetric>,
    conversations: BTreeMap<String, ConversationRecord>,
}

/// Store backed by process memory
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SiccStore for InMemoryStore {
    async fn insert_memory(&self, memory: &Memory) -> SiccResult<()> {
        let mut tables = self.tables.write().await;
        tables.memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn get_memory(&self, id: &str) -> SiccResult<Option<Memory>> {
        Ok(self.tables.read().await.memories.get(id).cloned())
    }

    async fn list_memories(&self, conversation_id: Option<&str>) -> SiccResult<Vec<Memory>> {
        let tables = self.tables.read().await;
        let mut memories: Vec<Memory> = tables
            .memories
            .values()
            .filter(|m| !m.is_deleted())
            .filter(|m| conversation_id.is_none_or(|id| m.conversation_id == id))
            .cloned()
            .collect();
        memories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }

    async fn soft_delete_memory(&self, id: &str, at: DateTime<Utc>) -> SiccResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.memories.get_mut(id) {
            Some(memory) if memory.deleted_at.is_none() => {
                memory.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_memories(&self, ids: &[String]) -> SiccResult<usize> {
        let mut tables = self.tables.write().await;
        Ok(ids
            .iter()
            .filter(|id| tables.memories.remove(id.as_str()).is_some())
            .count())
    }

    async fn update_memory_relevance(&self, id: &str, relevance: f64) -> SiccResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.memories.get_mut(id) {
            Some(memory) => {
                memory.relevance = relevance;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_deleted_memories(&self) -> SiccResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables.memories.values().filter(|m| m.is_deleted()).count())
    }

    async fn search_similar_memories(
        &self,
        embedding: &[f32],
        max_results: usize,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>> {
        let tables = self.tables.read().await;
        Ok(rank_by_vector(
            tables.memories.values().cloned(),
            embedding,
            max_results,
            filters,
        ))
    }

    async fn search_memories_hybrid(
        &self,
        query_text: &str,
        embedding: &[f32],
        max_results: usize,
        weights: HybridWeights,
        filters: &MemoryFilters,
    ) -> SiccResult<Vec<MemoryHit>> {
        let tables = self.tables.read().await;
        Ok(rank_hybrid(
            tables.memories.values().cloned(),
            query_text,
            embedding,
            max_results,
            weights,
            filters,
        ))
    }

    async fn upsert_pattern(&self, pattern: &Pattern) -> SiccResult<Pattern> {
        let mut tables = self.tables.write().await;
        let version = tables
            .patterns
            .get(&pattern.id)
            .map(|p| p.version + 1)
            .unwrap_or(1);

        let mut stored = pattern.clone();
        stored.version = version;
        tables.patterns.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_pattern(&self, id: &str) -> SiccResult<Option<Pattern>> {
        Ok(self.tables.read().await.patterns.get(id).cloned())
    }

    async fn list_patterns(&self) -> SiccResult<Vec<Pattern>> {
        Ok(self.tables.read().await.patterns.values().cloned().collect())
    }

    async fn upsert_assignment(&self, assignment: &PatternAssignment) -> SiccResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .assignments
            .insert(assignment.pattern_id.clone(), assignment.clone());
        Ok(())
    }

    async fn list_assignments(&self) -> SiccResult<Vec<PatternAssignment>> {
        Ok(self.tables.read().await.assignments.values().cloned().collect())
    }

    async fn append_decision(&self, decision: &ApprovalDecision) -> SiccResult<()> {
        self.tables.write().await.decisions.push(decision.clone());
        Ok(())
    }

    async fn list_decisions(&self, pattern_id: Option<&str>) -> SiccResult<Vec<ApprovalDecision>> {
        let tables = self.tables.read().await;
        Ok(tables
            .decisions
            .iter()
            .filter(|d| pattern_id.is_none_or(|id| d.pattern_id == id))
            .cloned()
            .collect())
    }

    async fn append_metric(&self, metric: &PerformanceMetric) -> SiccResult<()> {
        self.tables.write().await.metrics.push(metric.clone());
        Ok(())
    }

    async fn list_metrics(&self) -> SiccResult<Vec<PerformanceMetric>> {
        let mut metrics = self.tables.read().await.metrics.clone();
        metrics.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(metrics)
    }

    async fn save_conversation(&self, record: &ConversationRecord) -> SiccResult<()> {
        let mut tables = self.tables.write().await;
        tables.conversations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_conversations(&self) -> SiccResult<Vec<ConversationRecord>> {
        Ok(self.tables.read().await.conversations.values().cloned().collect())
    }

    async fn clear(&self) -> SiccResult<()> {
        *self.tables.write().await = Tables::default();
        Ok(())
    }
}
