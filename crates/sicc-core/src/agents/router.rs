//! Sub-Agent Router
//!
//! Places admitted patterns on the specialised sub-agent that fits them
//! best. An agent is eligible when it is active and its confidence threshold
//! is at or below the pattern's confidence; eligible agents are ranked by
//!
//! ```text
//! 0.8  if the pattern type is one of the agent's categories
//! +0.2 * share of pattern-type keywords found in the agent's categories
//! +1 / priority
//! +0.3 if the conversation's declared intent names the agent
//! ```
//!
//! with ties going to the most urgent (lowest) priority.

use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::types::{
    AgentConfigurationExport, AgentStats, PatternAssignment, SubAgentConfig, SubAgentType,
    SubAgentUpdate,
};
use crate::error::{SiccError, SiccResult};
use crate::learning::Pattern;
use crate::types::ConversationContext;
use crate::utils::{tokenize, validate_non_empty, validate_unit_interval};

const CATEGORY_MATCH_SCORE: f64 = 0.8;
const KEYWORD_OVERLAP_SCORE: f64 = 0.2;
const INTENT_MATCH_SCORE: f64 = 0.3;

/// Best-fit agent for a pattern, before any assignment is recorded
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSuggestion {
    pub agent: SubAgentType,
    pub score: f64,
    pub reason: String,
}

/// Routes patterns to sub-agents and tracks assignments
pub struct SubAgentRouter {
    agents: RwLock<BTreeMap<SubAgentType, SubAgentConfig>>,
    assignments: RwLock<BTreeMap<String, PatternAssignment>>,
}

impl Default for SubAgentRouter {
    fn default() -> Self {
        Self::new(SubAgentConfig::default_roster())
    }
}

impl SubAgentRouter {
    pub fn new(roster: Vec<SubAgentConfig>) -> Self {
        let agents = roster.into_iter().map(|c| (c.agent, c)).collect();
        Self {
            agents: RwLock::new(agents),
            assignments: RwLock::new(BTreeMap::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roster
    // ─────────────────────────────────────────────────────────────────────

    pub async fn agent(&self, agent: SubAgentType) -> Option<SubAgentConfig> {
        self.agents.read().await.get(&agent).cloned()
    }

    /// Roster ordered by priority
    pub async fn agents(&self) -> Vec<SubAgentConfig> {
        let mut agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.priority);
        agents
    }

    /// Admission threshold per rostered agent
    pub async fn thresholds(&self) -> BTreeMap<SubAgentType, f64> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(agent, config)| (*agent, config.confidence_threshold))
            .collect()
    }

    /// Apply a validated update to one agent
    ///
    /// Returns false without mutating anything when the agent is unknown,
    /// the threshold is outside `[0, 1]`, the priority is below 1 or the
    /// priority is held by another agent.
    pub async fn configure(&self, agent: SubAgentType, update: SubAgentUpdate) -> bool {
        let mut agents = self.agents.write().await;

        if let Some(threshold) = update.confidence_threshold {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                tracing::warn!(agent = %agent, threshold, "Rejected agent configuration: threshold out of range");
                return false;
            }
        }
        if let Some(priority) = update.priority {
            if priority < 1 {
                tracing::warn!(agent = %agent, priority, "Rejected agent configuration: priority below 1");
                return false;
            }
            if agents.values().any(|a| a.agent != agent && a.priority == priority) {
                tracing::warn!(agent = %agent, priority, "Rejected agent configuration: priority taken");
                return false;
            }
        }

        let Some(config) = agents.get_mut(&agent) else {
            return false;
        };

        if let Some(threshold) = update.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(categories) = update.categories {
            config.categories = categories;
        }
        if let Some(priority) = update.priority {
            config.priority = priority;
        }
        if let Some(active) = update.active {
            config.active = active;
        }

        tracing::info!(
            agent = %agent,
            threshold = config.confidence_threshold,
            priority = config.priority,
            active = config.active,
            "Configured sub-agent"
        );
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────

    /// Compatibility of a pattern with one agent
    pub fn compatibility_score(
        config: &SubAgentConfig,
        pattern_type: &str,
        context: Option<&ConversationContext>,
    ) -> f64 {
        let mut score = 0.0;

        if config.categories.contains(pattern_type) {
            score += CATEGORY_MATCH_SCORE;
        }

        let pattern_tokens = tokenize(pattern_type);
        if !pattern_tokens.is_empty() {
            let agent_tokens: BTreeSet<String> = config
                .categories
                .iter()
                .flat_map(|c| tokenize(c))
                .chain(tokenize(config.agent.as_str()))
                .collect();
            let overlap = pattern_tokens.intersection(&agent_tokens).count() as f64
                / pattern_tokens.len() as f64;
            score += KEYWORD_OVERLAP_SCORE * overlap;
        }

        score += 1.0 / config.priority.max(1) as f64;

        let intent_matches = context
            .and_then(|c| c.current_intent.as_deref())
            .is_some_and(|intent| intent.trim().eq_ignore_ascii_case(config.agent.as_str()));
        if intent_matches {
            score += INTENT_MATCH_SCORE;
        }

        score
    }

    /// Best eligible agent without recording an assignment
    pub async fn suggest(
        &self,
        pattern_type: &str,
        confidence: f64,
        context: Option<&ConversationContext>,
    ) -> Option<RouteSuggestion> {
        let agents = self.agents.read().await;

        best_match(
            agents
                .values()
                .filter(|a| a.active && a.confidence_threshold <= confidence),
            pattern_type,
            context,
        )
        .map(|(a, score)| RouteSuggestion {
            agent: a.agent,
            score,
            reason: if a.categories.contains(pattern_type) {
                format!(
                    "category '{}' owned by {} (score {:.2})",
                    pattern_type, a.agent, score
                )
            } else {
                format!(
                    "best compatibility for '{}' at confidence {:.2} (score {:.2})",
                    pattern_type, confidence, score
                )
            },
        })
    }

    /// Active agent that owns a pattern type, whatever its threshold
    ///
    /// Admission uses this to pick the threshold to hold a candidate to;
    /// [`suggest`](Self::suggest) only sees agents the confidence already clears.
    pub async fn owner(
        &self,
        pattern_type: &str,
        context: Option<&ConversationContext>,
    ) -> Option<SubAgentType> {
        let agents = self.agents.read().await;
        best_match(agents.values().filter(|a| a.active), pattern_type, context).map(|(a, _)| a.agent)
    }

    /// Assign a pattern to the best eligible agent
    ///
    /// Returns `None` when no active agent accepts the confidence. The
    /// assignment is upserted by pattern id; the latest call wins.
    pub async fn assign(
        &self,
        pattern_id: &str,
        pattern_type: &str,
        confidence: f64,
        context: Option<&ConversationContext>,
    ) -> SiccResult<Option<SubAgentType>> {
        validate_non_empty("pattern_id", pattern_id)?;
        validate_unit_interval("confidence", confidence)?;

        let Some(suggestion) = self.suggest(pattern_type, confidence, context).await else {
            tracing::debug!(
                pattern_id = %pattern_id,
                pattern_type = %pattern_type,
                confidence,
                "No eligible sub-agent"
            );
            return Ok(None);
        };

        let assignment = PatternAssignment {
            pattern_id: pattern_id.to_string(),
            agent: suggestion.agent,
            confidence,
            reason: suggestion.reason,
            assigned_at: Utc::now(),
        };
        self.assignments
            .write()
            .await
            .insert(pattern_id.to_string(), assignment);

        tracing::info!(
            pattern_id = %pattern_id,
            agent = %suggestion.agent,
            score = suggestion.score,
            "Assigned pattern to sub-agent"
        );
        Ok(Some(suggestion.agent))
    }

    pub async fn assignment(&self, pattern_id: &str) -> Option<PatternAssignment> {
        self.assignments.read().await.get(pattern_id).cloned()
    }

    pub async fn assignments(&self) -> Vec<PatternAssignment> {
        self.assignments.read().await.values().cloned().collect()
    }

    /// Reload assignments, e.g. from the store at startup
    pub async fn restore_assignments(&self, assignments: Vec<PatternAssignment>) {
        let mut current = self.assignments.write().await;
        for assignment in assignments {
            current.insert(assignment.pattern_id.clone(), assignment);
        }
    }

    pub async fn clear_assignments(&self) {
        self.assignments.write().await.clear();
    }

    /// Patterns assigned to `agent`, at or above `min_confidence` (the
    /// agent's own threshold when omitted), by confidence descending
    pub async fn get_specialized(
        &self,
        agent: SubAgentType,
        patterns: &[Pattern],
        min_confidence: Option<f64>,
    ) -> SiccResult<Vec<Pattern>> {
        if let Some(min) = min_confidence {
            validate_unit_interval("min_confidence", min)?;
        }

        let threshold = match min_confidence {
            Some(min) => min,
            None => self
                .agent(agent)
                .await
                .map(|a| a.confidence_threshold)
                .ok_or_else(|| SiccError::not_found("SubAgent", agent.as_str()))?,
        };

        let assignments = self.assignments.read().await;
        let mut specialized: Vec<Pattern> = patterns
            .iter()
            .filter(|p| {
                assignments
                    .get(&p.id)
                    .is_some_and(|a| a.agent == agent)
            })
            .filter(|p| p.confidence >= threshold)
            .cloned()
            .collect();

        specialized.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(specialized)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statistics & export
    // ─────────────────────────────────────────────────────────────────────

    /// Assigned-pattern count and mean confidence per rostered agent
    pub async fn stats(&self) -> BTreeMap<SubAgentType, AgentStats> {
        let agents = self.agents.read().await;
        let assignments = self.assignments.read().await;

        agents
            .keys()
            .map(|agent| {
                let confidences: Vec<f64> = assignments
                    .values()
                    .filter(|a| a.agent == *agent)
                    .map(|a| a.confidence)
                    .collect();
                let mean_confidence = if confidences.is_empty() {
                    0.0
                } else {
                    confidences.iter().sum::<f64>() / confidences.len() as f64
                };
                (
                    *agent,
                    AgentStats {
                        assigned_patterns: confidences.len(),
                        mean_confidence,
                    },
                )
            })
            .collect()
    }

    pub async fn export_configuration(&self) -> AgentConfigurationExport {
        let stats = self
            .stats()
            .await
            .into_iter()
            .map(|(agent, stats)| (agent.as_str().to_string(), stats))
            .collect();

        AgentConfigurationExport {
            agents: self.agents().await,
            assignments: self.assignments().await,
            stats,
            exported_at: Utc::now(),
        }
    }

    /// Replace the roster and assignments with an exported snapshot
    pub async fn import_configuration(&self, export: AgentConfigurationExport) -> SiccResult<()> {
        let mut seen_priorities = BTreeSet::new();
        let mut seen_agents = BTreeSet::new();
        for config in &export.agents {
            validate_unit_interval(
                &format!("agents.{}.confidence_threshold", config.agent),
                config.confidence_threshold,
            )?;
            if config.priority < 1 || !seen_priorities.insert(config.priority) {
                return Err(SiccError::validation(
                    format!("agents.{}.priority", config.agent),
                    format!("must be unique and at least 1 (got {})", config.priority),
                ));
            }
            if !seen_agents.insert(config.agent) {
                return Err(SiccError::validation(
                    format!("agents.{}", config.agent),
                    "declared more than once",
                ));
            }
        }

        *self.agents.write().await = export.agents.into_iter().map(|c| (c.agent, c)).collect();
        *self.assignments.write().await = export
            .assignments
            .into_iter()
            .map(|a| (a.pattern_id.clone(), a))
            .collect();

        tracing::info!("Imported sub-agent configuration");
        Ok(())
    }
}

/// Highest compatibility among `agents`; ties go to the lowest priority
fn best_match<'a>(
    agents: impl Iterator<Item = &'a SubAgentConfig>,
    pattern_type: &str,
    context: Option<&ConversationContext>,
) -> Option<(&'a SubAgentConfig, f64)> {
    agents
        .map(|a| (a, SubAgentRouter::compatibility_score(a, pattern_type, context)))
        .max_by(|(a, sa), (b, sb)| {
            sa.partial_cmp(sb)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.priority.cmp(&a.priority))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::categories;
    use crate::supervisor::ApprovalStatus;
    use std::collections::BTreeSet;

    fn pattern(id: &str, confidence: f64) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.into(),
            pattern_type: categories::PRODUCT_INQUIRY.into(),
            description: id.into(),
            trigger: "trigger".into(),
            action: "action".into(),
            confidence,
            frequency: 3,
            context_tags: vec![],
            conditions: vec![],
            supporting_conversations: BTreeSet::new(),
            status: ApprovalStatus::Approved,
            metadata: Default::default(),
            created_at: now,
            last_seen: now,
            version: 1,
        }
    }

    #[test]
    fn test_default_roster_priorities_are_distinct() {
        let roster = SubAgentConfig::default_roster();
        let priorities: BTreeSet<_> = roster.iter().map(|a| a.priority).collect();
        assert_eq!(priorities.len(), roster.len());
    }

    #[tokio::test]
    async fn test_assign_by_category() {
        let router = SubAgentRouter::default();

        let agent = router
            .assign("pat_1", categories::PRICE_OBJECTION, 0.85, None)
            .await
            .unwrap();
        assert_eq!(agent, Some(SubAgentType::Sales));

        let agent = router
            .assign("pat_2", categories::COMPLAINT, 0.75, None)
            .await
            .unwrap();
        assert_eq!(agent, Some(SubAgentType::Support));

        let agent = router
            .assign("pat_3", categories::GREETING, 0.65, None)
            .await
            .unwrap();
        assert_eq!(agent, Some(SubAgentType::Discovery));
    }

    #[tokio::test]
    async fn test_threshold_gates_eligibility() {
        let router = SubAgentRouter::default();

        // Sales owns the category but requires 0.8
        let agent = router
            .assign("pat_1", categories::CLOSING, 0.7, None)
            .await
            .unwrap();
        assert_ne!(agent, Some(SubAgentType::Sales));

        let none = router
            .assign("pat_2", categories::CLOSING, 0.5, None)
            .await
            .unwrap();
        assert_eq!(none, None);
        assert!(router.assignment("pat_2").await.is_none());
    }

    #[tokio::test]
    async fn test_owner_ignores_thresholds() {
        let router = SubAgentRouter::default();

        assert_eq!(router.suggest(categories::CLOSING, 0.5, None).await, None);
        assert_eq!(
            router.owner(categories::CLOSING, None).await,
            Some(SubAgentType::Sales)
        );
        assert_eq!(
            router.owner(categories::PRODUCT_INQUIRY, None).await,
            Some(SubAgentType::Discovery)
        );

        router
            .configure(
                SubAgentType::Sales,
                SubAgentUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await;
        assert_ne!(
            router.owner(categories::CLOSING, None).await,
            Some(SubAgentType::Sales)
        );
    }

    #[tokio::test]
    async fn test_intent_bonus_and_priority_tiebreak() {
        let router = SubAgentRouter::default();

        // No category match anywhere: priority bonus favours discovery
        let agent = router.assign("pat_1", "general", 0.9, None).await.unwrap();
        assert_eq!(agent, Some(SubAgentType::Discovery));

        // Intent bonus alone does not outweigh the priority gap
        let ctx = ConversationContext::default().with_intent("support");
        let agent = router.assign("pat_1", "general", 0.9, Some(&ctx)).await.unwrap();
        assert_eq!(agent, Some(SubAgentType::Discovery));

        // ... unless support also owns the category
        let agent = router
            .assign("pat_1", categories::POST_SALE, 0.9, Some(&ctx))
            .await
            .unwrap();
        assert_eq!(agent, Some(SubAgentType::Support));
        assert_eq!(router.assignments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_agents_are_skipped() {
        let router = SubAgentRouter::default();
        assert!(
            router
                .configure(
                    SubAgentType::Discovery,
                    SubAgentUpdate {
                        active: Some(false),
                        ..Default::default()
                    }
                )
                .await
        );

        let agent = router
            .assign("pat_1", categories::GREETING, 0.9, None)
            .await
            .unwrap();
        assert_ne!(agent, Some(SubAgentType::Discovery));
    }

    #[tokio::test]
    async fn test_configure_validation() {
        let router = SubAgentRouter::default();
        let before = router.agents().await;

        for update in [
            SubAgentUpdate {
                confidence_threshold: Some(1.5),
                ..Default::default()
            },
            SubAgentUpdate {
                confidence_threshold: Some(-0.1),
                ..Default::default()
            },
            SubAgentUpdate {
                priority: Some(0),
                ..Default::default()
            },
            SubAgentUpdate {
                priority: Some(1),
                ..Default::default()
            },
        ] {
            assert!(!router.configure(SubAgentType::Sales, update).await);
        }
        assert_eq!(router.agents().await, before);

        assert!(
            router
                .configure(
                    SubAgentType::Sales,
                    SubAgentUpdate {
                        confidence_threshold: Some(0.9),
                        priority: Some(5),
                        ..Default::default()
                    }
                )
                .await
        );
        let sales = router.agent(SubAgentType::Sales).await.unwrap();
        assert_eq!(sales.confidence_threshold, 0.9);
        assert_eq!(sales.priority, 5);
    }

    #[tokio::test]
    async fn test_get_specialized() {
        let router = SubAgentRouter::default();
        let patterns = vec![pattern("a", 0.65), pattern("b", 0.9), pattern("c", 0.75)];
        for p in &patterns {
            router.assign(&p.id, &p.pattern_type, p.confidence, None).await.unwrap();
        }

        let specialized = router
            .get_specialized(SubAgentType::Discovery, &patterns, None)
            .await
            .unwrap();
        let ids: Vec<_> = specialized.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let strict = router
            .get_specialized(SubAgentType::Discovery, &patterns, Some(0.8))
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);

        let none = router
            .get_specialized(SubAgentType::Sales, &patterns, None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_export_roundtrip() {
        let router = SubAgentRouter::default();
        router.assign("pat_1", categories::GREETING, 0.7, None).await.unwrap();
        router.assign("pat_2", categories::NEEDS_DISCOVERY, 0.9, None).await.unwrap();

        let stats = router.stats().await;
        assert_eq!(stats[&SubAgentType::Discovery].assigned_patterns, 2);
        assert!((stats[&SubAgentType::Discovery].mean_confidence - 0.8).abs() < 1e-9);
        assert_eq!(stats[&SubAgentType::Sales], AgentStats::default());

        let export = router.export_configuration().await;
        let json = serde_json::to_string(&export).unwrap();
        let parsed: AgentConfigurationExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, export);

        let fresh = SubAgentRouter::new(vec![]);
        fresh.import_configuration(parsed).await.unwrap();
        assert_eq!(fresh.agents().await, export.agents);
        assert_eq!(fresh.assignments().await, export.assignments);
    }
}
