//! Conflict Validator
//!
//! Checks a candidate pattern against the admitted pool before it becomes
//! servable. Each check is a [`ConflictRule`]; a rule that fails is logged
//! and skipped so the remaining rules still run.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::types::{ConflictAnalysis, ConflictDetail, ConflictType};
use crate::config::SupervisorConfig;
use crate::error::{SiccError, SiccResult};
use crate::learning::Pattern;
use crate::utils::{TextSimilarity, jaccard, normalize_text};

/// One pairwise conflict check
pub trait ConflictRule: Send + Sync {
    /// Rule name, used in logs
    fn name(&self) -> &str;

    /// Compare a candidate with one admitted pattern
    fn check(&self, candidate: &Pattern, existing: &Pattern) -> SiccResult<Option<ConflictDetail>>;
}

fn detail(
    conflict_type: ConflictType,
    existing: &Pattern,
    severity: f64,
    score: f64,
    description: String,
) -> ConflictDetail {
    ConflictDetail {
        id: format!("{}:{}", conflict_type.as_str(), existing.id),
        conflict_type,
        severity: severity.clamp(0.0, 1.0),
        description,
        existing_pattern_id: existing.id.clone(),
        score,
    }
}

fn checked_score(rule: &str, score: f64) -> SiccResult<f64> {
    if score.is_finite() {
        Ok(score)
    } else {
        Err(SiccError::validation(
            format!("{}.score", rule),
            format!("similarity must be finite (got {})", score),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rules
// ─────────────────────────────────────────────────────────────────────────────

/// Triggers that read alike; severity is the similarity itself
pub struct TriggerSimilarityRule {
    threshold: f64,
    similarity: Arc<dyn TextSimilarity>,
}

impl TriggerSimilarityRule {
    pub fn new(threshold: f64, similarity: Arc<dyn TextSimilarity>) -> Self {
        Self {
            threshold,
            similarity,
        }
    }
}

impl ConflictRule for TriggerSimilarityRule {
    fn name(&self) -> &str {
        ConflictType::TriggerSimilarity.as_str()
    }

    fn check(&self, candidate: &Pattern, existing: &Pattern) -> SiccResult<Option<ConflictDetail>> {
        let score = checked_score(
            self.name(),
            self.similarity.similarity(&candidate.trigger, &existing.trigger),
        )?;
        if score <= self.threshold {
            return Ok(None);
        }

        Ok(Some(detail(
            ConflictType::TriggerSimilarity,
            existing,
            score,
            score,
            format!(
                "Trigger is {:.0}% similar to pattern {} ({})",
                score * 100.0,
                existing.id,
                self.similarity.name()
            ),
        )))
    }
}

/// Context tag sets that largely coincide; severity is the overlap
pub struct ContextOverlapRule {
    threshold: f64,
}

impl ContextOverlapRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ConflictRule for ContextOverlapRule {
    fn name(&self) -> &str {
        ConflictType::ContextOverlap.as_str()
    }

    fn check(&self, candidate: &Pattern, existing: &Pattern) -> SiccResult<Option<ConflictDetail>> {
        let a: BTreeSet<&str> = candidate.context_tags.iter().map(String::as_str).collect();
        let b: BTreeSet<&str> = existing.context_tags.iter().map(String::as_str).collect();
        let overlap = checked_score(self.name(), jaccard(&a, &b))?;
        if overlap < self.threshold {
            return Ok(None);
        }

        let shared: Vec<&str> = a.intersection(&b).copied().collect();
        Ok(Some(detail(
            ConflictType::ContextOverlap,
            existing,
            overlap,
            overlap,
            format!(
                "Context tags overlap {:.0}% with pattern {} (shared: {})",
                overlap * 100.0,
                existing.id,
                shared.join(", ")
            ),
        )))
    }
}

/// Identical triggers answered with different actions
pub struct ResponseContradictionRule {
    severity: f64,
}

impl ResponseContradictionRule {
    pub fn new(severity: f64) -> Self {
        Self { severity }
    }
}

impl ConflictRule for ResponseContradictionRule {
    fn name(&self) -> &str {
        ConflictType::ResponseContradiction.as_str()
    }

    fn check(&self, candidate: &Pattern, existing: &Pattern) -> SiccResult<Option<ConflictDetail>> {
        let same_trigger = normalize_text(&candidate.trigger) == normalize_text(&existing.trigger);
        let same_action = normalize_text(&candidate.action) == normalize_text(&existing.action);
        if !same_trigger || same_action {
            return Ok(None);
        }

        Ok(Some(detail(
            ConflictType::ResponseContradiction,
            existing,
            self.severity,
            1.0,
            format!(
                "Same trigger as pattern {} but a different response",
                existing.id
            ),
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

/// Runs every rule against every admitted pattern
pub struct ConflictValidator {
    rules: Vec<Box<dyn ConflictRule>>,
    manual_review_severity: f64,
    redesign_conflict_count: usize,
}

impl ConflictValidator {
    /// Validator with the trigger, context and contradiction rules
    pub fn new(config: &SupervisorConfig, similarity: Arc<dyn TextSimilarity>) -> Self {
        Self {
            rules: vec![
                Box::new(TriggerSimilarityRule::new(
                    config.trigger_similarity_threshold,
                    similarity,
                )),
                Box::new(ContextOverlapRule::new(config.context_overlap_threshold)),
                Box::new(ResponseContradictionRule::new(config.contradiction_severity)),
            ],
            manual_review_severity: config.manual_review_severity,
            redesign_conflict_count: config.redesign_conflict_count,
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn ConflictRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Conflicts of `candidate` against `existing`, by severity descending
    ///
    /// Patterns sharing the candidate's id are skipped before scoring.
    pub fn validate(&self, candidate: &Pattern, existing: &[Pattern]) -> ConflictAnalysis {
        let mut conflicts = Vec::new();

        for other in existing.iter().filter(|p| p.id != candidate.id) {
            for rule in &self.rules {
                match rule.check(candidate, other) {
                    Ok(Some(conflict)) => conflicts.push(conflict),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            rule = rule.name(),
                            pattern_id = %candidate.id,
                            existing_pattern_id = %other.id,
                            error = %e,
                            "Conflict rule failed, skipping"
                        );
                    }
                }
            }
        }

        conflicts.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.conflict_type.as_str().cmp(b.conflict_type.as_str()))
                .then_with(|| a.existing_pattern_id.cmp(&b.existing_pattern_id))
        });

        let severity_score = conflicts.iter().map(|c| c.severity).fold(0.0, f64::max);
        let recommendations = self.recommendations(&conflicts, severity_score);

        if !conflicts.is_empty() {
            tracing::debug!(
                pattern_id = %candidate.id,
                conflicts = conflicts.len(),
                severity = severity_score,
                "Conflicts detected"
            );
        }

        ConflictAnalysis {
            pattern_id: candidate.id.clone(),
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            severity_score,
            recommendations,
        }
    }

    fn recommendations(&self, conflicts: &[ConflictDetail], severity: f64) -> Vec<String> {
        let mut out = Vec::new();
        if conflicts.is_empty() {
            return out;
        }

        out.push(format!(
            "Review {} conflict(s) with admitted patterns before serving this one",
            conflicts.len()
        ));

        if conflicts
            .iter()
            .any(|c| c.conflict_type == ConflictType::ResponseContradiction)
        {
            out.push("Reconcile the contradicting responses for the shared trigger".to_string());
        }

        if conflicts.len() > self.redesign_conflict_count {
            out.push(format!(
                "Consider redesigning the pattern: {} conflicts exceed the limit of {}",
                conflicts.len(),
                self.redesign_conflict_count
            ));
        }

        if severity > self.manual_review_severity {
            out.push(format!(
                "Manual review required: severity {:.2} is above {:.2}",
                severity, self.manual_review_severity
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ApprovalStatus;
    use crate::utils::TokenOverlap;
    use chrono::Utc;

    fn pattern(id: &str, trigger: &str, action: &str, tags: &[&str]) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.into(),
            pattern_type: "general".into(),
            description: format!("general: {}", trigger),
            trigger: trigger.into(),
            action: action.into(),
            confidence: 0.8,
            frequency: 3,
            context_tags: tags.iter().map(|t| t.to_string()).collect(),
            conditions: vec![],
            supporting_conversations: Default::default(),
            status: ApprovalStatus::Approved,
            metadata: Default::default(),
            created_at: now,
            last_seen: now,
            version: 1,
        }
    }

    fn validator() -> ConflictValidator {
        ConflictValidator::new(&SupervisorConfig::default(), Arc::new(TokenOverlap))
    }

    struct FailingRule;

    impl ConflictRule for FailingRule {
        fn name(&self) -> &str {
            "failing"
        }

        fn check(&self, _: &Pattern, _: &Pattern) -> SiccResult<Option<ConflictDetail>> {
            Err(SiccError::Other(anyhow::anyhow!("rule exploded")))
        }
    }

    #[test]
    fn test_empty_pool_has_no_conflicts() {
        let candidate = pattern("a", "hello there", "hi", &["discovery"]);
        let analysis = validator().validate(&candidate, &[]);

        assert!(!analysis.has_conflicts);
        assert_eq!(analysis.severity_score, 0.0);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_never_conflicts_with_itself() {
        let candidate = pattern("a", "hello there", "hi", &["discovery"]);
        let analysis = validator().validate(&candidate, &[candidate.clone()]);
        assert!(!analysis.has_conflicts);
    }

    #[test]
    fn test_unrelated_pattern_is_clean() {
        let existing = vec![pattern("b", "refund my order", "sorry", &["support"])];
        let candidate = pattern("a", "which colours available", "red blue", &["discovery"]);

        let analysis = validator().validate(&candidate, &existing);
        assert!(!analysis.has_conflicts);
        assert!(analysis.severity_score < 0.3);
    }

    #[test]
    fn test_contradiction_and_similarity() {
        let existing = vec![pattern("b", "Is there a discount?", "No discounts", &["sales"])];
        let candidate = pattern("a", "is there a discount", "Yes, 10% off", &["sales"]);

        let analysis = validator().validate(&candidate, &existing);
        assert!(analysis.has_conflicts);

        let types: Vec<_> = analysis.conflicts.iter().map(|c| c.conflict_type).collect();
        assert_eq!(
            types,
            vec![
                ConflictType::ContextOverlap,
                ConflictType::TriggerSimilarity,
                ConflictType::ResponseContradiction,
            ]
        );
        assert_eq!(analysis.severity_score, 1.0);
        assert_eq!(analysis.conflicts[2].severity, 0.8);
        assert_eq!(analysis.conflict_ids()[2], "response_contradiction:b");

        // baseline, contradiction, redesign (3 > 2), manual review (1.0 > 0.8)
        assert_eq!(analysis.recommendations.len(), 4);
    }

    #[test]
    fn test_severity_is_max_and_sorted() {
        let existing = vec![
            pattern("b", "price too high", "x", &["sales", "pricing"]),
            pattern("c", "unrelated words entirely", "y", &["sales", "pricing", "vip"]),
        ];
        let candidate = pattern("a", "the price is too high", "z", &["sales", "pricing"]);

        let analysis = validator().validate(&candidate, &existing);
        let max = analysis
            .conflicts
            .iter()
            .map(|c| c.severity)
            .fold(0.0, f64::max);
        assert_eq!(analysis.severity_score, max);
        assert!(
            analysis
                .conflicts
                .windows(2)
                .all(|w| w[0].severity >= w[1].severity)
        );
    }

    #[test]
    fn test_validation_is_deterministic() {
        let existing = vec![
            pattern("b", "price too high", "x", &["sales"]),
            pattern("c", "price is high", "y", &["sales"]),
        ];
        let candidate = pattern("a", "price too high", "z", &["sales"]);
        let v = validator();

        let first = v.validate(&candidate, &existing);
        for _ in 0..3 {
            assert_eq!(v.validate(&candidate, &existing), first);
        }
    }

    #[test]
    fn test_failing_rule_does_not_abort_others() {
        let v = validator().with_rule(Box::new(FailingRule));
        assert_eq!(v.rule_names().len(), 4);

        let existing = vec![pattern("b", "same words", "x", &["t"])];
        let candidate = pattern("a", "same words", "y", &["t"]);

        let analysis = v.validate(&candidate, &existing);
        assert_eq!(analysis.conflicts.len(), 3);
    }
}
