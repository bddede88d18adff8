//! Supervisor
//!
//! Admission control for learned patterns. A candidate becomes servable
//! only when it clears the [`ApprovalGate`] (confidence vs threshold) and
//! the [`ConflictValidator`] finds nothing that needs a human.

mod approval;
mod conflict;
mod types;

pub use approval::{ApprovalGate, DEFAULT_APPROVAL_THRESHOLD, SUPERVISOR_APPROVER};
pub use conflict::{
    ConflictRule, ConflictValidator, ContextOverlapRule, ResponseContradictionRule,
    TriggerSimilarityRule,
};
pub use types::*;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::agents::SubAgentType;
use crate::config::SupervisorConfig;
use crate::learning::Pattern;
use crate::utils::TextSimilarity;

/// Result of one admission attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub log: LearningLog,
    pub analysis: ConflictAnalysis,
    pub decision: ApprovalDecision,
}

impl Admission {
    pub fn is_approved(&self) -> bool {
        self.decision.status == ApprovalStatus::Approved
    }
}

pub struct Supervisor {
    validator: ConflictValidator,
    gate: RwLock<ApprovalGate>,
}

impl Supervisor {
    pub fn new(config: &SupervisorConfig, similarity: Arc<dyn TextSimilarity>) -> Self {
        Self {
            validator: ConflictValidator::new(config, similarity),
            gate: RwLock::new(ApprovalGate::new(config.approval_threshold)),
        }
    }

    pub fn validator(&self) -> &ConflictValidator {
        &self.validator
    }

    /// Keep per-agent thresholds in step with the router roster
    pub async fn sync_thresholds(&self, thresholds: BTreeMap<SubAgentType, f64>) {
        self.gate.write().await.set_overrides(thresholds);
    }

    pub async fn threshold_for(&self, agent: Option<SubAgentType>) -> f64 {
        self.gate.read().await.threshold_for(agent)
    }

    pub async fn auto_approve(&self, confidence: f64, threshold: Option<f64>) -> crate::SiccResult<bool> {
        self.gate.read().await.auto_approve(confidence, threshold)
    }

    /// Validate a candidate against the admitted pool, then decide
    pub async fn admit(
        &self,
        candidate: &Pattern,
        existing: &[Pattern],
        sub_agent: Option<SubAgentType>,
    ) -> Admission {
        let analysis = self.validator.validate(candidate, existing);

        let mut log = LearningLog::new(&candidate.id, candidate.confidence)
            .with_conflicts(analysis.conflict_ids());
        if let Some(agent) = sub_agent {
            log = log.with_sub_agent(agent);
        }

        let decision = self.gate.read().await.evaluate(&log);

        Admission {
            log,
            analysis,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TokenOverlap;
    use chrono::Utc;

    fn pattern(id: &str, trigger: &str, confidence: f64, tags: &[&str]) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.into(),
            pattern_type: "product_inquiry".into(),
            description: id.into(),
            trigger: trigger.into(),
            action: "Let me show you".into(),
            confidence,
            frequency: 4,
            context_tags: tags.iter().map(|t| t.to_string()).collect(),
            conditions: vec![],
            supporting_conversations: Default::default(),
            status: ApprovalStatus::Pending,
            metadata: Default::default(),
            created_at: now,
            last_seen: now,
            version: 0,
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(&SupervisorConfig::default(), Arc::new(TokenOverlap))
    }

    #[tokio::test]
    async fn test_admit_clean_candidate() {
        let sup = supervisor();
        let candidate = pattern("a", "do you sell running shoes", 0.7, &["discovery"]);

        let admission = sup.admit(&candidate, &[], None).await;
        assert!(admission.is_approved());
        assert_eq!(admission.decision.learning_log_id, admission.log.id);
        assert_eq!(admission.decision.threshold_used, 0.7);
    }

    #[tokio::test]
    async fn test_admit_conflicting_candidate_needs_review() {
        let sup = supervisor();
        let existing = vec![pattern("b", "do you sell running shoes", 0.9, &["discovery"])];
        let candidate = pattern("a", "do you sell running shoes?", 0.9, &["discovery"]);

        let admission = sup.admit(&candidate, &existing, None).await;
        assert_eq!(admission.decision.status, ApprovalStatus::NeedsReview);
        assert_eq!(admission.decision.conflict_ids, admission.analysis.conflict_ids());
    }

    #[tokio::test]
    async fn test_synced_thresholds_apply() {
        let sup = supervisor();
        sup.sync_thresholds(BTreeMap::from([(SubAgentType::Sales, 0.8)]))
            .await;

        let candidate = pattern("a", "too expensive", 0.75, &["sales"]);
        let admission = sup.admit(&candidate, &[], Some(SubAgentType::Sales)).await;
        assert_eq!(admission.decision.status, ApprovalStatus::Rejected);
        assert_eq!(admission.decision.threshold_used, 0.8);

        assert!(sup.auto_approve(0.75, None).await.unwrap());
    }
}
