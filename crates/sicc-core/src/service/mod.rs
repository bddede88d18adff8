//! SICC Service
//!
//! Process-wide facade wiring the memory store, learning loop, router,
//! supervisor, behavior engine and metrics together. Construct one per
//! process with an injected store and embedder and share it by `Arc`.
//!
//! Turns of one conversation are serialised by a per-conversation lock;
//! different conversations interleave freely.

mod types;
mod worker;

pub use types::*;
pub use worker::MaintenanceWorker;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::agents::{AgentConfigurationExport, SubAgentRouter, SubAgentType, SubAgentUpdate};
use crate::behavior::{ApplicablePattern, BehaviorEngine, TextGenerator};
use crate::config::SiccConfig;
use crate::error::{SiccError, SiccResult};
use crate::learning::{LearningReport, Pattern, PatternExtractor};
use crate::memory::{Embedder, HashingEmbedder, MemoryService, RememberOptions};
use crate::metrics::{
    IntelligenceReport, MetricType, MetricsExport, MetricsReporter, PerformanceMetric,
};
use crate::store::{InMemoryStore, RetryPolicy, SiccStore, with_retry, with_timeout};
use crate::supervisor::{ApprovalDecision, ApprovalStatus, Supervisor};
use crate::types::{ConversationContext, ConversationOutcome, ConversationRecord, Message};
use crate::utils::{TextSimilarity, TokenOverlap, validate_non_empty};

type ConversationHandle = Arc<Mutex<ConversationRecord>>;

struct OpenConversation {
    record: ConversationHandle,
    last_touched: DateTime<Utc>,
}

pub struct SiccService {
    config: SiccConfig,
    store: Arc<dyn SiccStore>,
    retry: RetryPolicy,
    memory: MemoryService,
    extractor: PatternExtractor,
    router: SubAgentRouter,
    supervisor: Supervisor,
    behavior: BehaviorEngine,
    metrics: MetricsReporter,
    active: Mutex<HashMap<String, OpenConversation>>,
}

impl SiccService {
    /// Build the service and restore assignments and metrics from the store
    pub async fn new(
        config: SiccConfig,
        store: Arc<dyn SiccStore>,
        embedder: Arc<dyn Embedder>,
    ) -> SiccResult<Self> {
        config.validate()?;
        if embedder.dimensions() != config.memory.embedding_dimensions {
            return Err(SiccError::validation(
                "memory.embedding_dimensions",
                format!(
                    "embedder produces {} dimensions (got {} in config)",
                    embedder.dimensions(),
                    config.memory.embedding_dimensions
                ),
            ));
        }

        let similarity: Arc<dyn TextSimilarity> = Arc::new(TokenOverlap);
        let retry = RetryPolicy::from_config(&config.store, &config.timeouts);

        let service = Self {
            memory: MemoryService::new(
                Arc::clone(&store),
                embedder,
                config.memory.clone(),
                config.timeouts.clone(),
                retry,
            ),
            extractor: PatternExtractor::new(config.learning.clone(), Arc::clone(&similarity)),
            router: SubAgentRouter::new(config.agents.clone()),
            supervisor: Supervisor::new(&config.supervisor, Arc::clone(&similarity)),
            behavior: BehaviorEngine::new(config.behavior.clone(), similarity, &config.timeouts),
            metrics: MetricsReporter::new(),
            active: Mutex::new(HashMap::new()),
            store,
            retry,
            config,
        };

        service.restore().await?;
        Ok(service)
    }

    /// Service over an in-memory store and the hashing embedder
    pub async fn in_memory(config: SiccConfig) -> SiccResult<Self> {
        let embedder = Arc::new(HashingEmbedder::new(config.memory.embedding_dimensions));
        Self::new(config, Arc::new(InMemoryStore::new()), embedder).await
    }

    /// Adapt responses through an LLM
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.behavior = self.behavior.with_generator(generator);
        self
    }

    async fn restore(&self) -> SiccResult<()> {
        let store = &self.store;
        let assignments =
            with_retry(&self.retry, "list_assignments", move || store.list_assignments()).await?;
        let restored = assignments.len();
        self.router.restore_assignments(assignments).await;
        self.sync_thresholds().await;

        let metrics = with_retry(&self.retry, "list_metrics", move || store.list_metrics()).await?;
        let metrics = self.metrics.restore(metrics).await;

        tracing::info!(assignments = restored, metrics, "SICC service ready");
        Ok(())
    }

    async fn sync_thresholds(&self) {
        self.supervisor.sync_thresholds(self.router.thresholds().await).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &SiccConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SiccStore> {
        &self.store
    }

    pub fn memory(&self) -> &MemoryService {
        &self.memory
    }

    pub fn extractor(&self) -> &PatternExtractor {
        &self.extractor
    }

    pub fn router(&self) -> &SubAgentRouter {
        &self.router
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn behavior(&self) -> &BehaviorEngine {
        &self.behavior
    }

    pub fn metrics(&self) -> &MetricsReporter {
        &self.metrics
    }

    // ─────────────────────────────────────────────────────────────────────
    // Conversation lifecycle
    // ─────────────────────────────────────────────────────────────────────

    async fn conversation(&self, conversation_id: &str) -> ConversationHandle {
        let mut active = self.active.lock().await;
        let open = active
            .entry(conversation_id.to_string())
            .or_insert_with(|| OpenConversation {
                record: Arc::new(Mutex::new(ConversationRecord::new(conversation_id))),
                last_touched: Utc::now(),
            });
        open.last_touched = Utc::now();
        Arc::clone(&open.record)
    }

    /// Conversations started or spoken in and not yet ended
    pub async fn open_conversations(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Record a sample and append it to the store
    ///
    /// A store failure leaves the sample in this process's history only.
    async fn record_metric(
        &self,
        metric_type: MetricType,
        value: f64,
        agent: Option<SubAgentType>,
        pattern_id: Option<&str>,
    ) {
        let mut metric = PerformanceMetric::new(metric_type, value);
        if let Some(agent) = agent {
            metric = metric.with_agent(agent);
        }
        if let Some(pattern_id) = pattern_id {
            metric = metric.with_pattern(pattern_id);
        }
        if !self.metrics.record_metric(metric.clone()).await {
            return;
        }

        let store = &self.store;
        let row = &metric;
        if let Err(e) = with_retry(&self.retry, "append_metric", move || store.append_metric(row)).await {
            tracing::warn!(metric = %metric.metric_type, error = %e, "Metric not persisted");
        }
    }

    async fn load_patterns(&self) -> SiccResult<Vec<Pattern>> {
        let store = &self.store;
        with_retry(&self.retry, "list_patterns", move || store.list_patterns()).await
    }

    /// Open a conversation and return the patterns ready to serve it
    ///
    /// With a current message in the context, patterns are matched against
    /// it; otherwise the sub-agent's specialised patterns are returned.
    pub async fn process_conversation_start(
        &self,
        conversation_id: &str,
        user_context: &Value,
        sub_agent_type: Option<&str>,
    ) -> SiccResult<ConversationStart> {
        validate_non_empty("conversation_id", conversation_id)?;
        let context = ConversationContext::from_json(user_context)?;
        let sub_agent = sub_agent_type
            .map(str::parse::<SubAgentType>)
            .transpose()?;

        let handle = self.conversation(conversation_id).await;
        {
            let mut record = handle.lock().await;
            if let Some(agent) = sub_agent {
                record.sub_agent.get_or_insert(agent);
                let tag = agent.as_str().to_string();
                if !record.context_tags.contains(&tag) {
                    record.context_tags.push(tag);
                }
            }
        }

        let patterns = self.load_patterns().await?;
        let message = context
            .current_message
            .as_deref()
            .filter(|m| !m.trim().is_empty());

        let applicable_patterns = match (message, sub_agent) {
            (Some(message), _) => self
                .behavior
                .prioritize(self.behavior.find_applicable(message, &context, &patterns)?),
            (None, Some(agent)) => {
                let servable: Vec<Pattern> = patterns.into_iter().filter(|p| p.is_servable()).collect();
                self.router
                    .get_specialized(agent, &servable, None)
                    .await?
                    .into_iter()
                    .take(self.behavior.config().max_applicable_patterns)
                    .map(|p| {
                        let relevance = p.confidence;
                        ApplicablePattern::new(p, relevance).with_context(context.clone())
                    })
                    .collect()
            }
            (None, None) => Vec::new(),
        };

        tracing::info!(
            conversation_id = %conversation_id,
            sub_agent = ?sub_agent,
            applicable = applicable_patterns.len(),
            "Conversation started"
        );

        Ok(ConversationStart {
            conversation_id: conversation_id.to_string(),
            applicable_patterns,
        })
    }

    /// Handle one customer message within the turn timeout
    ///
    /// Always returns a structured outcome; failures are reported through
    /// its status.
    pub async fn process_turn(
        &self,
        conversation_id: &str,
        message: &str,
        context: &Value,
    ) -> TurnOutcome {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        if message.trim().is_empty() {
            return TurnOutcome::ignored(conversation_id, "empty message");
        }
        if let Err(e) = validate_non_empty("conversation_id", conversation_id) {
            return TurnOutcome::failed(conversation_id, TurnStatus::Error, &e, elapsed());
        }
        let context = match ConversationContext::from_json(context) {
            Ok(context) => context,
            Err(e) => return TurnOutcome::failed(conversation_id, TurnStatus::Error, &e, elapsed()),
        };

        let budget = self.config.timeouts.turn();
        match with_timeout(
            budget,
            "process_turn",
            self.turn(conversation_id, message, context, started),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_timeout() => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Turn timed out");
                TurnOutcome::failed(conversation_id, TurnStatus::Timeout, &e, elapsed())
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "Turn failed");
                TurnOutcome::failed(conversation_id, TurnStatus::Error, &e, elapsed())
            }
        }
    }

    async fn turn(
        &self,
        conversation_id: &str,
        message: &str,
        mut context: ConversationContext,
        started: Instant,
    ) -> SiccResult<TurnOutcome> {
        let handle = self.conversation(conversation_id).await;
        let mut record = handle.lock().await;
        record.messages.push(Message::customer(message));
        context.current_message = Some(message.to_string());

        let mut degraded = false;
        if let Err(e) = self
            .memory
            .remember(conversation_id, message, RememberOptions::default())
            .await
        {
            if !(e.is_timeout() || e.is_transient()) {
                return Err(e);
            }
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Turn continues without storing memory"
            );
            degraded = true;
        }

        let memory_context = self.memory.get_relevant_context(conversation_id, message).await?;
        degraded |= memory_context.degraded;

        let patterns = self.load_patterns().await?;
        let ranked = self
            .behavior
            .prioritize(self.behavior.find_applicable(message, &context, &patterns)?);

        let response = match ranked.first() {
            Some(top) => {
                let result = self.behavior.apply(Some(top), &context).await?;
                record.messages.push(Message::agent(result.response_text.clone()));
                degraded |= result.metadata.get("degraded") == Some(&Value::Bool(true));

                let agent = self.router.assignment(&top.pattern.id).await.map(|a| a.agent);
                self.record_metric(
                    MetricType::PatternApplication,
                    result.confidence,
                    agent,
                    Some(&top.pattern.id),
                )
                .await;
                Some(result)
            }
            None => None,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.record_metric(MetricType::ResponseTime, elapsed_ms as f64, record.sub_agent, None)
            .await;

        tracing::info!(
            conversation_id = %conversation_id,
            applicable = ranked.len(),
            responded = response.is_some(),
            degraded,
            elapsed_ms,
            "Processed turn"
        );

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            status: TurnStatus::Success,
            response,
            applicable_patterns: ranked.len(),
            context_memories: memory_context.memories.len(),
            degraded,
            error: memory_context.error,
            elapsed_ms,
        })
    }

    /// Close a conversation, persist it and kick off learning
    pub async fn process_conversation_end(
        &self,
        conversation_id: &str,
        final_context: &Value,
        outcome: ConversationOutcome,
    ) -> SiccResult<ConversationEnd> {
        validate_non_empty("conversation_id", conversation_id)?;
        let context = ConversationContext::from_json(final_context)?;

        let handle = self
            .active
            .lock()
            .await
            .remove(conversation_id)
            .map(|open| open.record)
            .ok_or_else(|| SiccError::not_found("Conversation", conversation_id))?;

        // Waits for an in-flight turn
        let mut record = handle.lock().await.clone();
        record.outcome = Some(outcome);
        record.ended_at = Some(Utc::now());
        if let Some(intent) = context
            .current_intent
            .as_deref()
            .map(|i| i.trim().to_lowercase())
            .filter(|i| !i.is_empty())
        {
            if !record.context_tags.contains(&intent) {
                record.context_tags.push(intent);
            }
        }

        let store = &self.store;
        let row = &record;
        with_retry(&self.retry, "save_conversation", move || store.save_conversation(row)).await?;

        self.record_metric(MetricType::SuccessRate, outcome.success_score(), record.sub_agent, None)
            .await;

        let learning_initiated = if outcome != ConversationOutcome::Abandoned && record.trigger().is_some() {
            match self.run_learning_cycle().await {
                Ok(report) => report.conversations_analyzed >= self.config.learning.min_conversations,
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Learning cycle failed"
                    );
                    false
                }
            }
        } else {
            false
        };

        tracing::info!(
            conversation_id = %conversation_id,
            outcome = outcome.as_str(),
            learning_initiated,
            "Conversation ended"
        );

        Ok(ConversationEnd {
            conversation_id: conversation_id.to_string(),
            outcome,
            learning_initiated,
        })
    }

    /// Record the reply a human or external agent sent in an open conversation
    ///
    /// Learning takes a pattern's action from these replies; conversations
    /// without one never produce a servable pattern.
    pub async fn record_reply(&self, conversation_id: &str, reply: &str) -> SiccResult<()> {
        validate_non_empty("conversation_id", conversation_id)?;
        validate_non_empty("reply", reply)?;

        let handle = {
            let mut active = self.active.lock().await;
            let open = active
                .get_mut(conversation_id)
                .ok_or_else(|| SiccError::not_found("Conversation", conversation_id))?;
            open.last_touched = Utc::now();
            Arc::clone(&open.record)
        };
        handle.lock().await.messages.push(Message::agent(reply.trim()));

        tracing::debug!(conversation_id = %conversation_id, "Recorded agent reply");
        Ok(())
    }

    /// Apply a specific pattern to a conversation
    pub async fn apply_pattern(
        &self,
        conversation_id: &str,
        pattern_id: &str,
        context: &Value,
    ) -> SiccResult<PatternApplication> {
        validate_non_empty("conversation_id", conversation_id)?;
        validate_non_empty("pattern_id", pattern_id)?;
        let context = ConversationContext::from_json(context)?;

        let pattern = self.pattern(pattern_id).await?;
        if !pattern.is_servable() {
            return Ok(PatternApplication {
                success: false,
                response: None,
                reason: Some(format!(
                    "pattern {} is {} with frequency {}",
                    pattern.id, pattern.status, pattern.frequency
                )),
            });
        }

        let relevance = context
            .current_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(|m| self.behavior.relevance(m, &pattern))
            .unwrap_or(1.0);
        let applicable = ApplicablePattern::new(pattern, relevance).with_context(context.clone());
        let result = self.behavior.apply(Some(&applicable), &context).await?;

        let handle = self
            .active
            .lock()
            .await
            .get(conversation_id)
            .map(|open| Arc::clone(&open.record));
        if let Some(handle) = handle {
            handle
                .lock()
                .await
                .messages
                .push(Message::agent(result.response_text.clone()));
        }

        let agent = self.router.assignment(pattern_id).await.map(|a| a.agent);
        self.record_metric(MetricType::PatternApplication, result.confidence, agent, Some(pattern_id))
            .await;

        Ok(PatternApplication {
            success: true,
            response: Some(result),
            reason: None,
        })
    }

    /// Store finished conversations for the next learning cycle
    pub async fn ingest_conversations(&self, records: &[ConversationRecord]) -> SiccResult<usize> {
        let store = &self.store;
        for record in records {
            validate_non_empty("conversation.id", &record.id)?;
            with_retry(&self.retry, "save_conversation", move || store.save_conversation(record)).await?;
        }

        tracing::info!(conversations = records.len(), "Ingested conversations");
        Ok(records.len())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Learning
    // ─────────────────────────────────────────────────────────────────────

    /// Extract patterns from stored conversations and admit them
    ///
    /// Patterns not yet approved go through the supervisor against the
    /// approved pool, held to the stricter of the global threshold and the
    /// owning sub-agent's; every decision is appended to the store.
    /// Approved patterns are (re)assigned to their best sub-agent.
    pub async fn run_learning_cycle(&self) -> SiccResult<LearningReport> {
        let store = &self.store;
        let conversations =
            with_retry(&self.retry, "list_conversations", move || store.list_conversations()).await?;

        let mut report = LearningReport {
            conversations_analyzed: conversations.len(),
            ..Default::default()
        };
        if conversations.len() < self.config.learning.min_conversations {
            tracing::debug!(
                conversations = conversations.len(),
                "Not enough conversations to learn from"
            );
            return Ok(report);
        }

        let existing = self.load_patterns().await?;
        let extracted = self.extractor.analyze_conversation_patterns(&conversations);
        report.patterns_extracted = extracted.len();
        let candidates = self.extractor.merge_with_existing(&existing, extracted);

        let mut pool: Vec<Pattern> = existing
            .into_iter()
            .filter(|p| p.status == ApprovalStatus::Approved)
            .collect();

        for mut candidate in candidates {
            if candidate.status != ApprovalStatus::Approved {
                let owner = self.router.owner(&candidate.pattern_type, None).await;
                let admission = self.supervisor.admit(&candidate, &pool, owner).await;

                let decision = &admission.decision;
                with_retry(&self.retry, "append_decision", move || store.append_decision(decision))
                    .await?;

                candidate.status = decision.status;
                match decision.status {
                    ApprovalStatus::Approved => report.approved += 1,
                    ApprovalStatus::Rejected => report.rejected += 1,
                    ApprovalStatus::NeedsReview => report.needs_review += 1,
                    ApprovalStatus::Pending => {}
                }
            }

            let row = &candidate;
            let stored = with_retry(&self.retry, "upsert_pattern", move || store.upsert_pattern(row)).await?;

            if stored.status == ApprovalStatus::Approved {
                let placed = self
                    .router
                    .assign(&stored.id, &stored.pattern_type, stored.confidence, None)
                    .await?;
                if placed.is_some() {
                    if let Some(assignment) = self.router.assignment(&stored.id).await {
                        let assignment = &assignment;
                        with_retry(&self.retry, "upsert_assignment", move || {
                            store.upsert_assignment(assignment)
                        })
                        .await?;
                        report.assigned += 1;
                    }
                }
                pool.retain(|p| p.id != stored.id);
                pool.push(stored);
            }
        }

        let evaluated = report.approved + report.rejected + report.needs_review;
        if evaluated > 0 {
            self.record_metric(
                MetricType::LearningAccuracy,
                report.approved as f64 / evaluated as f64,
                None,
                None,
            )
            .await;
        }

        tracing::info!(
            conversations = report.conversations_analyzed,
            extracted = report.patterns_extracted,
            approved = report.approved,
            rejected = report.rejected,
            needs_review = report.needs_review,
            assigned = report.assigned,
            "Learning cycle complete"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Patterns & agents
    // ─────────────────────────────────────────────────────────────────────

    pub async fn pattern(&self, pattern_id: &str) -> SiccResult<Pattern> {
        let store = &self.store;
        with_retry(&self.retry, "get_pattern", move || store.get_pattern(pattern_id))
            .await?
            .ok_or_else(|| SiccError::not_found("Pattern", pattern_id))
    }

    /// All patterns by confidence, or one agent's specialised set
    pub async fn patterns(&self, agent: Option<SubAgentType>) -> SiccResult<Vec<Pattern>> {
        let mut patterns = self.load_patterns().await?;
        match agent {
            Some(agent) => self.router.get_specialized(agent, &patterns, None).await,
            None => {
                patterns.sort_by(|a, b| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.cmp(&b.id))
                });
                Ok(patterns)
            }
        }
    }

    pub async fn decisions(&self, pattern_id: Option<&str>) -> SiccResult<Vec<ApprovalDecision>> {
        let store = &self.store;
        with_retry(&self.retry, "list_decisions", move || store.list_decisions(pattern_id)).await
    }

    /// Update one sub-agent; returns false when the update is rejected
    pub async fn configure_agent(&self, agent_id: &str, update: SubAgentUpdate) -> SiccResult<bool> {
        let agent: SubAgentType = agent_id.parse()?;
        let applied = self.router.configure(agent, update).await;
        if applied {
            self.sync_thresholds().await;
        }
        Ok(applied)
    }

    pub async fn export_configuration(&self) -> AgentConfigurationExport {
        self.router.export_configuration().await
    }

    /// Load an exported roster and its assignments, persisting the latter
    pub async fn import_configuration(&self, export: AgentConfigurationExport) -> SiccResult<()> {
        self.router.import_configuration(export).await?;

        let store = &self.store;
        for assignment in self.router.assignments().await {
            let assignment = &assignment;
            with_retry(&self.retry, "upsert_assignment", move || store.upsert_assignment(assignment))
                .await?;
        }
        self.sync_thresholds().await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reporting & maintenance
    // ─────────────────────────────────────────────────────────────────────

    pub async fn intelligence_report(&self) -> IntelligenceReport {
        self.metrics.generate_report().await
    }

    pub async fn export_metrics(&self, window_hours: Option<u64>) -> MetricsExport {
        self.metrics.export(window_hours).await
    }

    /// Close conversations idle for at least `max_idle` as abandoned
    ///
    /// Closed conversations with messages are saved for learning. A
    /// conversation whose turn is in flight stays open.
    pub async fn close_idle_conversations(&self, max_idle: Duration) -> SiccResult<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Ok(0);
        };

        let closed: Vec<ConversationRecord> = {
            let mut active = self.active.lock().await;
            let idle: Vec<String> = active
                .iter()
                .filter(|(_, open)| open.last_touched <= cutoff)
                .map(|(id, _)| id.clone())
                .collect();

            let mut closed = Vec::with_capacity(idle.len());
            for id in idle {
                let snapshot = match active.get(&id).map(|open| open.record.try_lock()) {
                    Some(Ok(record)) => record.clone(),
                    _ => continue,
                };
                active.remove(&id);
                closed.push(snapshot);
            }
            closed
        };

        let store = &self.store;
        let now = Utc::now();
        for mut record in closed.iter().filter(|r| !r.messages.is_empty()).cloned() {
            record.outcome = Some(ConversationOutcome::Abandoned);
            record.ended_at = Some(now);
            let row = &record;
            with_retry(&self.retry, "save_conversation", move || store.save_conversation(row)).await?;
        }

        if !closed.is_empty() {
            tracing::info!(closed = closed.len(), "Closed idle conversations");
        }
        Ok(closed.len())
    }

    /// Retention sweep, relevance decay and idle conversation cleanup
    pub async fn run_maintenance(&self) -> SiccResult<MaintenanceReport> {
        let memory = &self.config.memory;
        let memories_removed = self.memory.cleanup_old_memories(memory.retention_days).await?;
        let memories_decayed = self.memory.decay_relevance(memory.decay_half_life_days).await?;
        let conversations_closed = self
            .close_idle_conversations(Duration::from_secs(
                self.config.maintenance.idle_conversation_secs,
            ))
            .await?;

        tracing::info!(
            removed = memories_removed,
            decayed = memories_decayed,
            closed = conversations_closed,
            "Maintenance complete"
        );
        Ok(MaintenanceReport {
            memories_removed,
            memories_decayed,
            conversations_closed,
        })
    }

    /// Drop every stored row, assignment, metric and open conversation
    #[cfg(any(test, feature = "test-util"))]
    pub async fn reset(&self) -> SiccResult<()> {
        self.store.clear().await?;
        self.router.clear_assignments().await;
        self.metrics.reset().await;
        self.active.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SupervisorConfig, TimeoutConfig};
    use crate::learning::categories;
    use crate::supervisor::{ApprovalGate, ConflictValidator, LearningLog};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;

    async fn service() -> SiccService {
        SiccService::in_memory(SiccConfig::default()).await.unwrap()
    }

    fn interested(id: usize) -> ConversationRecord {
        let trigger = if id % 2 == 0 {
            "I am interested in product X"
        } else {
            "Hello, I am interested in product X"
        };
        let mut record = ConversationRecord::new(format!("c{:02}", id))
            .with_message(Message::customer(trigger))
            .with_message(Message::agent("Great choice! Product X is in stock in three colours."))
            .with_tag("discovery");
        record.sub_agent = Some(SubAgentType::Discovery);
        record.outcome = Some(ConversationOutcome::Success);
        record
    }

    fn pattern(id: &str, trigger: &str, confidence: f64) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.into(),
            pattern_type: categories::GENERAL.into(),
            description: id.into(),
            trigger: trigger.into(),
            action: "ok".into(),
            confidence,
            frequency: 2,
            context_tags: vec![],
            conditions: vec![],
            supporting_conversations: BTreeSet::new(),
            status: ApprovalStatus::Pending,
            metadata: Default::default(),
            created_at: now,
            last_seen: now,
            version: 0,
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn dimensions(&self) -> usize {
            crate::memory::EMBEDDING_DIMENSIONS
        }

        async fn embed(&self, text: &str) -> SiccResult<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            HashingEmbedder::default().embed(text).await
        }
    }

    #[tokio::test]
    async fn test_scenario_a_learn_admit_and_serve() {
        let service = service().await;
        let records: Vec<_> = (0..10).map(interested).collect();
        service.ingest_conversations(&records).await.unwrap();

        let report = service.run_learning_cycle().await.unwrap();
        assert_eq!(report.conversations_analyzed, 10);
        assert_eq!(report.approved, 1);
        assert_eq!(report.assigned, 1);

        let patterns = service.patterns(None).await.unwrap();
        let learned = &patterns[0];
        assert_eq!(learned.frequency, 10);
        assert!(learned.confidence >= 0.7);
        assert_eq!(learned.status, ApprovalStatus::Approved);
        assert_eq!(learned.pattern_type, categories::PRODUCT_INQUIRY);

        let assignment = service.router().assignment(&learned.id).await.unwrap();
        assert_eq!(assignment.agent, SubAgentType::Discovery);

        let decisions = service.decisions(Some(&learned.id)).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].status, ApprovalStatus::Approved);

        let start = service
            .process_conversation_start(
                "new",
                &json!({"sender_name": "Ana", "current_message": "I am interested in product X"}),
                Some("discovery"),
            )
            .await
            .unwrap();
        assert_eq!(start.applicable_patterns[0].pattern.id, learned.id);

        let outcome = service
            .process_turn("new", "I am interested in product X", &json!({}))
            .await;
        assert_eq!(outcome.status, TurnStatus::Success);
        let response = outcome.response.unwrap();
        assert_eq!(response.pattern_applied, learned.id);
        assert!(!response.response_text.trim().is_empty());

        let report = service.intelligence_report().await;
        assert_eq!(report.total_patterns_learned, 1);
    }

    #[tokio::test]
    async fn test_learning_is_stable_across_reruns() {
        let service = service().await;
        let records: Vec<_> = (0..10).map(interested).collect();
        service.ingest_conversations(&records).await.unwrap();

        service.run_learning_cycle().await.unwrap();
        let first = service.patterns(None).await.unwrap();
        let report = service.run_learning_cycle().await.unwrap();
        let second = service.patterns(None).await.unwrap();

        assert_eq!(report.approved, 0);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
        assert!(second[0].version > first[0].version);
    }

    async fn learn_from(service: &SiccService, conversations: usize) -> LearningReport {
        let records: Vec<_> = (0..conversations).map(interested).collect();
        service.ingest_conversations(&records).await.unwrap();
        service.run_learning_cycle().await.unwrap()
    }

    #[tokio::test]
    async fn test_learning_holds_discovery_to_the_global_threshold() {
        // Discovery's own threshold is 0.6; six conversations reach exactly that
        let service = service().await;
        let report = learn_from(&service, 6).await;
        assert_eq!(report.approved, 0);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.assigned, 0);

        let learned = &service.patterns(None).await.unwrap()[0];
        assert!((learned.confidence - 0.6).abs() < 1e-9);
        assert_eq!(learned.status, ApprovalStatus::Rejected);
        assert!(service.router().assignment(&learned.id).await.is_none());

        let decision = &service.decisions(Some(&learned.id)).await.unwrap()[0];
        assert_eq!(decision.threshold_used, 0.7);
        assert!(decision.approved_at.is_none());

        let outcome = service
            .process_turn("next", "I am interested in product X", &json!({}))
            .await;
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_learning_approves_at_the_threshold() {
        let service = service().await;
        let report = learn_from(&service, 7).await;
        assert_eq!(report.approved, 1);
        assert_eq!(report.assigned, 1);

        let learned = &service.patterns(None).await.unwrap()[0];
        assert_eq!(learned.confidence, 0.7);
        assert_eq!(learned.status, ApprovalStatus::Approved);

        let decision = &service.decisions(Some(&learned.id)).await.unwrap()[0];
        assert_eq!(decision.status, ApprovalStatus::Approved);
        assert_eq!(decision.threshold_used, 0.7);
    }

    #[tokio::test]
    async fn test_learning_uses_configured_approval_threshold() {
        let config = SiccConfig::default().with_supervisor(SupervisorConfig {
            approval_threshold: 0.9,
            ..Default::default()
        });
        let service = SiccService::in_memory(config).await.unwrap();

        let report = learn_from(&service, 7).await;
        assert_eq!(report.approved, 0);
        assert_eq!(report.rejected, 1);

        let decisions = service.decisions(None).await.unwrap();
        assert_eq!(decisions[0].threshold_used, 0.9);
        assert_eq!(decisions[0].status, ApprovalStatus::Rejected);
    }

    async fn live_conversation(service: &SiccService, id: &str, message: &str, reply: Option<&str>) {
        service
            .process_conversation_start(id, &json!({"platform": "whatsapp"}), Some("discovery"))
            .await
            .unwrap();
        service.process_turn(id, message, &json!({})).await;
        if let Some(reply) = reply {
            service.record_reply(id, reply).await.unwrap();
        }
        service
            .process_conversation_end(id, &json!({}), ConversationOutcome::Success)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_conversations_serve_the_recorded_reply() {
        let service = service().await;
        let message = "do you have the blue model in stock";
        for i in 0..7 {
            live_conversation(
                &service,
                &format!("live-{}", i),
                message,
                Some("Yes, the blue model ships today."),
            )
            .await;
        }

        let patterns = service.patterns(None).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].status, ApprovalStatus::Approved);

        let outcome = service.process_turn("next", message, &json!({})).await;
        assert_eq!(
            outcome.response.unwrap().response_text,
            "Yes, the blue model ships today."
        );
    }

    #[tokio::test]
    async fn test_unanswered_conversations_learn_nothing() {
        let service = service().await;
        let message = "do you have the blue model in stock";
        for i in 0..7 {
            live_conversation(&service, &format!("live-{}", i), message, None).await;
        }

        assert!(service.patterns(None).await.unwrap().is_empty());
        let outcome = service.process_turn("next", message, &json!({})).await;
        assert_eq!(outcome.status, TurnStatus::Success);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_record_reply_needs_an_open_conversation() {
        let service = service().await;
        let err = service.record_reply("ghost", "hello").await.unwrap_err();
        assert!(err.is_not_found());

        service.process_turn("c1", "hello", &json!({})).await;
        assert!(service.record_reply("c1", "  ").await.unwrap_err().is_validation());
        service.record_reply("c1", "Hi! How can I help?").await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_b_unrelated_pattern_is_clean() {
        let service = service().await;
        let existing = vec![pattern("a", "I am interested in product X", 0.9)];
        let candidate = pattern("b", "my parcel never arrived", 0.9);

        let validator: &ConflictValidator = service.supervisor().validator();
        let analysis = validator.validate(&candidate, &existing);
        assert!(!analysis.has_conflicts);
        assert!(analysis.severity_score < 0.3);
    }

    #[tokio::test]
    async fn test_scenario_c_search_validation() {
        let service = service().await;
        let memory = service.memory();

        assert!(memory.search_similar("", 5, None).await.unwrap_err().is_validation());
        assert!(memory.search_similar("valid query", 0, None).await.unwrap_err().is_validation());
        assert!(memory.search_similar("valid query", 101, None).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_scenario_d_boundary_approval() {
        let service = service().await;
        assert!(service.supervisor().auto_approve(0.7, Some(0.7)).await.unwrap());

        let admission = service
            .supervisor()
            .admit(&pattern("p", "exactly at the line", 0.7), &[], None)
            .await;
        assert_eq!(admission.decision.status, ApprovalStatus::Approved);
        assert_eq!(admission.decision.threshold_used, 0.7);

        let decision = ApprovalGate::default().evaluate(&LearningLog::new("p", 0.7));
        assert_eq!(decision.status, ApprovalStatus::Approved);
        assert!(decision.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_turn_statuses() {
        let service = service().await;

        let ignored = service.process_turn("c1", "   ", &json!({})).await;
        assert_eq!(ignored.status, TurnStatus::Ignored);

        let bad_context = service.process_turn("c1", "hello", &json!(["not", "a", "map"])).await;
        assert_eq!(bad_context.status, TurnStatus::Error);
        assert!(bad_context.error.unwrap().contains("context"));

        let ok = service.process_turn("c1", "hello there", &json!({})).await;
        assert_eq!(ok.status, TurnStatus::Success);
        assert!(ok.response.is_none());
    }

    #[tokio::test]
    async fn test_turn_timeout_is_reported() {
        let config = SiccConfig::default().with_timeouts(TimeoutConfig {
            turn_ms: 50,
            ..Default::default()
        });
        let service = SiccService::new(config, Arc::new(InMemoryStore::new()), Arc::new(SlowEmbedder))
            .await
            .unwrap();

        let outcome = service.process_turn("c1", "hello", &json!({})).await;
        assert_eq!(outcome.status, TurnStatus::Timeout);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_turns_see_earlier_writes() {
        let service = service().await;
        service
            .process_turn("c1", "I need running shoes size 42", &json!({}))
            .await;
        let second = service
            .process_turn("c1", "running shoes size 42 in blue", &json!({}))
            .await;

        assert_eq!(second.status, TurnStatus::Success);
        assert!(second.context_memories >= 1);
    }

    #[tokio::test]
    async fn test_conversation_end_triggers_learning() {
        let service = service().await;

        let missing = service
            .process_conversation_end("ghost", &json!({}), ConversationOutcome::Success)
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        for (i, id) in ["a", "b"].into_iter().enumerate() {
            service
                .process_conversation_start(id, &json!({"platform": "whatsapp"}), Some("discovery"))
                .await
                .unwrap();
            service
                .process_turn(id, "Do you have this model in size 40?", &json!({}))
                .await;
            service.record_reply(id, "Yes, size 40 is in stock.").await.unwrap();
            let end = service
                .process_conversation_end(id, &json!({}), ConversationOutcome::Success)
                .await
                .unwrap();
            assert_eq!(end.learning_initiated, i == 1);
        }

        assert_eq!(service.patterns(None).await.unwrap().len(), 1);
        let stats = service.metrics().get_stats(None, None).await;
        assert_eq!(stats[&MetricType::SuccessRate].count, 2);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_input() {
        let service = service().await;

        let err = service
            .process_conversation_start("c1", &json!("text"), None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = service
            .process_conversation_start("c1", &json!({}), Some("finance"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_apply_pattern() {
        let service = service().await;
        let err = service
            .apply_pattern("c1", "pat_missing", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let mut pending = pattern("pending", "hi", 0.9);
        pending.action = "Hello {sender_name}, how can I help today?".into();
        service.store().upsert_pattern(&pending).await.unwrap();
        let result = service.apply_pattern("c1", "pending", &json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.reason.is_some());

        let mut approved = pending.clone();
        approved.id = "approved".into();
        approved.status = ApprovalStatus::Approved;
        service.store().upsert_pattern(&approved).await.unwrap();
        let result = service
            .apply_pattern("c1", "approved", &json!({"sender_name": "Ana"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.response.unwrap().response_text,
            "Hello Ana, how can I help today?"
        );
    }

    #[tokio::test]
    async fn test_configure_agent_syncs_thresholds() {
        let service = service().await;

        assert!(service.configure_agent("bogus", SubAgentUpdate::default()).await.unwrap_err().is_validation());

        let rejected = service
            .configure_agent(
                "sales",
                SubAgentUpdate {
                    confidence_threshold: Some(1.2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!rejected);

        let applied = service
            .configure_agent(
                "sales",
                SubAgentUpdate {
                    confidence_threshold: Some(0.9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(
            service.supervisor().threshold_for(Some(SubAgentType::Sales)).await,
            0.9
        );
    }

    #[tokio::test]
    async fn test_export_import_restores_assignments() {
        let store: Arc<dyn SiccStore> = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashingEmbedder::default());

        let first = SiccService::new(SiccConfig::default(), Arc::clone(&store), embedder.clone())
            .await
            .unwrap();
        let records: Vec<_> = (0..10).map(interested).collect();
        first.ingest_conversations(&records).await.unwrap();
        first.run_learning_cycle().await.unwrap();
        let export = first.export_configuration().await;
        assert_eq!(export.assignments.len(), 1);

        let json = serde_json::to_string(&export).unwrap();
        let parsed: AgentConfigurationExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.agents, export.agents);
        assert_eq!(parsed.assignments, export.assignments);

        // A second service over the same store picks the assignment up
        let second = SiccService::new(SiccConfig::default(), Arc::clone(&store), embedder)
            .await
            .unwrap();
        assert_eq!(second.router().assignments().await, export.assignments);

        let fresh = service().await;
        fresh.import_configuration(parsed).await.unwrap();
        assert_eq!(fresh.router().assignments().await, export.assignments);
        assert_eq!(fresh.store().list_assignments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_worker_runs_until_shutdown() {
        let service = Arc::new(service().await);
        service.process_turn("c1", "remember me", &json!({})).await;

        let worker = MaintenanceWorker::spawn(Arc::clone(&service), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        let runs = worker.shutdown().await;
        assert!(runs >= 1);

        // Fresh memories are never swept
        assert_eq!(service.memory().stats().await.unwrap().live_memories, 1);
    }

    #[tokio::test]
    async fn test_idle_conversations_are_closed() {
        let service = service().await;
        for i in 0..500 {
            service
                .process_turn(&format!("visitor-{}", i), "hello there", &json!({}))
                .await;
        }
        assert_eq!(service.open_conversations().await, 500);

        // Default idle window keeps fresh conversations open
        let report = service.run_maintenance().await.unwrap();
        assert_eq!(report.conversations_closed, 0);
        assert_eq!(service.open_conversations().await, 500);

        let closed = service.close_idle_conversations(Duration::ZERO).await.unwrap();
        assert_eq!(closed, 500);
        assert_eq!(service.open_conversations().await, 0);

        let saved = service.store().list_conversations().await.unwrap();
        assert_eq!(saved.len(), 500);
        assert!(saved
            .iter()
            .all(|c| c.outcome == Some(ConversationOutcome::Abandoned) && c.ended_at.is_some()));

        let err = service
            .process_conversation_end("visitor-0", &json!({}), ConversationOutcome::Success)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_metrics_survive_a_restart() {
        let store: Arc<dyn SiccStore> = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashingEmbedder::default());

        let first = SiccService::new(SiccConfig::default(), Arc::clone(&store), embedder.clone())
            .await
            .unwrap();
        learn_from(&first, 10).await;
        first.process_turn("c1", "I am interested in product X", &json!({})).await;
        let before = first.intelligence_report().await;
        assert_eq!(before.total_patterns_learned, 1);

        let second = SiccService::new(SiccConfig::default(), store, embedder)
            .await
            .unwrap();
        let after = second.intelligence_report().await;
        assert_eq!(after.total_metrics, before.total_metrics);
        assert_eq!(after.total_patterns_learned, 1);
        assert_eq!(after.agent_stats, before.agent_stats);
        assert_eq!(
            second.export_metrics(None).await.metrics,
            first.export_metrics(None).await.metrics
        );
    }

    #[tokio::test]
    async fn test_export_metrics_accepts_any_window() {
        let service = service().await;
        service.process_turn("c1", "hello", &json!({})).await;

        for window in [0, 10_000_000_000, u64::MAX] {
            let export = service.export_metrics(Some(window)).await;
            assert_eq!(export.window_hours, Some(window));
        }
        assert_eq!(service.export_metrics(Some(u64::MAX)).await.metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let service = service().await;
        let records: Vec<_> = (0..10).map(interested).collect();
        service.ingest_conversations(&records).await.unwrap();
        service.run_learning_cycle().await.unwrap();
        service.process_turn("c1", "I am interested in product X", &json!({})).await;

        service.reset().await.unwrap();

        assert!(service.patterns(None).await.unwrap().is_empty());
        assert!(service.router().assignments().await.is_empty());
        assert!(service.metrics().is_empty().await);
        assert_eq!(service.intelligence_report().await.total_patterns_learned, 0);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_embedder() {
        let err = SiccService::new(
            SiccConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::new(16)),
        )
        .await
        .err()
        .unwrap();
        assert!(err.is_validation());
    }
}
