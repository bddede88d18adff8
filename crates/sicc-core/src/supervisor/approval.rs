//! Approval Gate
//!
//! Confidence-threshold half of admission. `auto_approve` is a pure,
//! boundary-inclusive comparison; `evaluate` turns a learning log into a
//! recorded decision, applying the sub-agent's threshold when it is the
//! stricter one.

use chrono::Utc;
use std::collections::BTreeMap;

use super::types::{ApprovalDecision, ApprovalStatus, LearningLog};
use crate::agents::SubAgentType;
use crate::error::SiccResult;
use crate::utils::validate_unit_interval;

/// Global threshold used when neither the caller nor a sub-agent sets one
pub const DEFAULT_APPROVAL_THRESHOLD: f64 = 0.7;

/// Approver identity written on automatic decisions
pub const SUPERVISOR_APPROVER: &str = "sicc-supervisor";

#[derive(Debug, Clone)]
pub struct ApprovalGate {
    default_threshold: f64,
    overrides: BTreeMap<SubAgentType, f64>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_THRESHOLD)
    }
}

impl ApprovalGate {
    pub fn new(default_threshold: f64) -> Self {
        Self {
            default_threshold,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, agent: SubAgentType, threshold: f64) -> Self {
        self.overrides.insert(agent, threshold);
        self
    }

    /// Replace all sub-agent overrides
    pub fn set_overrides(&mut self, overrides: BTreeMap<SubAgentType, f64>) {
        self.overrides = overrides;
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// Threshold a candidate routed to `agent` must clear
    ///
    /// A sub-agent can raise the bar above the global threshold but never
    /// lower it.
    pub fn threshold_for(&self, agent: Option<SubAgentType>) -> f64 {
        agent
            .and_then(|a| self.overrides.get(&a).copied())
            .map_or(self.default_threshold, |t| t.max(self.default_threshold))
    }

    /// `confidence >= threshold`, with the default threshold when omitted
    pub fn auto_approve(&self, confidence: f64, threshold: Option<f64>) -> SiccResult<bool> {
        validate_unit_interval("confidence", confidence)?;
        let threshold = threshold.unwrap_or(self.default_threshold);
        validate_unit_interval("threshold", threshold)?;

        Ok(confidence >= threshold)
    }

    /// Decide on a learning log
    ///
    /// Below threshold is rejected; conflicts send an otherwise passing
    /// pattern to review. An invalid confidence is rejected with the
    /// validation message as the reason.
    pub fn evaluate(&self, log: &LearningLog) -> ApprovalDecision {
        let threshold = self.threshold_for(log.sub_agent);

        let (status, reason) = match self.auto_approve(log.confidence_score, Some(threshold)) {
            Err(e) => (ApprovalStatus::Rejected, format!("Invalid input: {}", e)),
            Ok(false) => (
                ApprovalStatus::Rejected,
                format!(
                    "Confidence {:.3} is below the threshold {:.3}",
                    log.confidence_score, threshold
                ),
            ),
            Ok(true) if !log.conflict_ids.is_empty() => (
                ApprovalStatus::NeedsReview,
                format!(
                    "Confidence {:.3} meets the threshold {:.3} but {} conflict(s) need review: {}",
                    log.confidence_score,
                    threshold,
                    log.conflict_ids.len(),
                    log.conflict_ids.join(", ")
                ),
            ),
            Ok(true) => (
                ApprovalStatus::Approved,
                format!(
                    "Confidence {:.3} meets the threshold {:.3} with no conflicts",
                    log.confidence_score, threshold
                ),
            ),
        };

        let decided_at = Utc::now();
        tracing::info!(
            pattern_id = %log.pattern_id,
            learning_log_id = %log.id,
            status = %status,
            confidence = log.confidence_score,
            threshold,
            "Approval decision"
        );

        ApprovalDecision {
            learning_log_id: log.id.clone(),
            pattern_id: log.pattern_id.clone(),
            status,
            confidence_score: log.confidence_score,
            threshold_used: threshold,
            conflict_ids: log.conflict_ids.clone(),
            reason,
            approver: SUPERVISOR_APPROVER.to_string(),
            decided_at,
            approved_at: (status == ApprovalStatus::Approved).then_some(decided_at),
        }
    }
}
