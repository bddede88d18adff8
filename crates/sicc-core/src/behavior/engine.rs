//! Pattern Application Engine
//!
//! Request-time path: **search** servable patterns above the relevance
//! floor, **prioritize** them by the weighted blend of confidence,
//! relevance, frequency and recency, **apply** the chosen one and **adapt**
//! its template to the conversation.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::types::{ApplicablePattern, ResponseResult, TextGenerator};
use crate::config::{BehaviorConfig, TimeoutConfig};
use crate::error::{SiccError, SiccResult};
use crate::learning::Pattern;
use crate::store::with_timeout;
use crate::types::ConversationContext;
use crate::utils::{TextSimilarity, tokenize, validate_non_empty};

/// Reply used when a pattern carries no usable text at all
const FALLBACK_RESPONSE: &str = "Could you tell me a little more about what you need?";

pub struct BehaviorEngine {
    config: BehaviorConfig,
    similarity: Arc<dyn TextSimilarity>,
    generator: Option<Arc<dyn TextGenerator>>,
    llm_timeout: Duration,
}

impl BehaviorEngine {
    pub fn new(
        config: BehaviorConfig,
        similarity: Arc<dyn TextSimilarity>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            config,
            similarity,
            generator: None,
            llm_timeout: timeouts.llm(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────

    /// Relevance of a pattern's trigger to a message
    ///
    /// Half text similarity, half the share of trigger tokens present in the
    /// message.
    pub fn relevance(&self, message: &str, pattern: &Pattern) -> f64 {
        let message_tokens = tokenize(message);
        let trigger_tokens = tokenize(&pattern.trigger);
        if message_tokens.is_empty() || trigger_tokens.is_empty() {
            return 0.0;
        }

        let coverage = message_tokens.intersection(&trigger_tokens).count() as f64
            / trigger_tokens.len() as f64;
        let similarity = self.similarity.similarity(message, &pattern.trigger);
        if !similarity.is_finite() {
            return 0.0;
        }

        (0.5 * similarity + 0.5 * coverage).clamp(0.0, 1.0)
    }

    /// Servable patterns relevant to `message`, by relevance descending
    pub fn find_applicable(
        &self,
        message: &str,
        context: &ConversationContext,
        patterns: &[Pattern],
    ) -> SiccResult<Vec<ApplicablePattern>> {
        validate_non_empty("message", message)?;

        let mut applicable: Vec<ApplicablePattern> = patterns
            .iter()
            .filter(|p| p.is_servable())
            .filter_map(|p| {
                let relevance = self.relevance(message, p);
                (relevance >= self.config.relevance_floor).then(|| {
                    ApplicablePattern::new(p.clone(), relevance).with_context(context.clone())
                })
            })
            .collect();

        applicable.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.pattern
                        .confidence
                        .partial_cmp(&a.pattern.confidence)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });
        applicable.truncate(self.config.max_applicable_patterns);

        tracing::debug!(
            candidates = patterns.len(),
            applicable = applicable.len(),
            "Found applicable patterns"
        );
        Ok(applicable)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Prioritize
    // ─────────────────────────────────────────────────────────────────────

    /// Weighted blend of confidence, relevance, frequency and recency
    pub fn combined_score(&self, applicable: &ApplicablePattern, now: DateTime<Utc>) -> f64 {
        let c = &self.config;
        let pattern = &applicable.pattern;

        let frequency = (pattern.frequency as f64 / c.frequency_normalizer).min(1.0);
        let days = ((now - pattern.last_seen).num_seconds() as f64 / 86_400.0).max(0.0);
        let recency = (1.0 - days / c.recency_window_days).max(0.0);

        let score = c.confidence_weight * pattern.confidence
            + c.relevance_weight * applicable.relevance_score
            + c.frequency_weight * frequency
            + c.recency_weight * recency;

        if score.is_finite() { score } else { 0.0 }
    }

    /// Stable reorder by combined score, highest first
    pub fn prioritize(&self, applicable: Vec<ApplicablePattern>) -> Vec<ApplicablePattern> {
        if applicable.len() < 2 {
            return applicable;
        }

        let now = Utc::now();
        let mut scored: Vec<(f64, ApplicablePattern)> = applicable
            .into_iter()
            .map(|a| (self.combined_score(&a, now), a))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        scored.into_iter().map(|(_, a)| a).collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Apply & adapt
    // ─────────────────────────────────────────────────────────────────────

    /// Build a response from a pattern
    ///
    /// With a generator configured the deterministic adaptation is handed to
    /// the LLM under its timeout; any failure falls back to the
    /// deterministic text and marks the result degraded.
    pub async fn apply(
        &self,
        applicable: Option<&ApplicablePattern>,
        context: &ConversationContext,
    ) -> SiccResult<ResponseResult> {
        let applicable = applicable
            .ok_or_else(|| SiccError::validation("pattern", "an applicable pattern is required"))?;
        let pattern = &applicable.pattern;

        let base = [applicable.template(), pattern.description.as_str()]
            .into_iter()
            .find(|t| !t.trim().is_empty())
            .unwrap_or(FALLBACK_RESPONSE);
        let deterministic = self.adapt(base, context);

        let mut degraded = false;
        let mut adapted_by_llm = false;
        let mut response_text = deterministic.clone();

        if let Some(generator) = &self.generator {
            let prompt = adaptation_prompt(&deterministic, context);
            match with_timeout(self.llm_timeout, "llm_adapt", generator.generate(&prompt)).await {
                Ok(text) if self.accepts_generated(&text, &deterministic) => {
                    response_text = text.trim().to_string();
                    adapted_by_llm = true;
                }
                Ok(_) => {
                    tracing::warn!(
                        pattern_id = %pattern.id,
                        generator = generator.name(),
                        "Generated response rejected, using template"
                    );
                    degraded = true;
                }
                Err(e) => {
                    tracing::warn!(
                        pattern_id = %pattern.id,
                        generator = generator.name(),
                        error = %e,
                        "Response adaptation failed, using template"
                    );
                    degraded = true;
                }
            }
        }

        let confidence = (0.7 * pattern.confidence + 0.3 * applicable.relevance_score).clamp(0.0, 1.0);

        let mut metadata = BTreeMap::new();
        metadata.insert("pattern_id".to_string(), json!(pattern.id));
        metadata.insert("pattern_type".to_string(), json!(pattern.pattern_type));
        metadata.insert("relevance_score".to_string(), json!(applicable.relevance_score));
        metadata.insert("degraded".to_string(), json!(degraded));
        if let Some(generator) = &self.generator {
            metadata.insert("generator".to_string(), Value::String(generator.name().to_string()));
        }

        tracing::info!(
            pattern_id = %pattern.id,
            adapted_by_llm,
            degraded,
            confidence,
            "Applied pattern"
        );

        Ok(ResponseResult {
            response_text,
            confidence: if confidence.is_finite() { confidence } else { 0.0 },
            pattern_applied: pattern.id.clone(),
            adapted_by_llm,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// Fill `{placeholder}`s from the context and tidy whitespace
    ///
    /// Falls back to the template itself when the result would be empty or
    /// shorter than the configured share of the template.
    pub fn adapt(&self, template: &str, context: &ConversationContext) -> String {
        if template.trim().is_empty() {
            return template.to_string();
        }

        let adapted = tidy(&fill_placeholders(template, context));
        let min_chars =
            (template.chars().count() as f64 * self.config.min_adapted_ratio).ceil() as usize;

        if adapted.is_empty() || adapted.chars().count() < min_chars {
            tracing::debug!(
                template_chars = template.chars().count(),
                adapted_chars = adapted.chars().count(),
                "Adaptation stripped too much, keeping template"
            );
            return template.to_string();
        }

        adapted
    }

    fn accepts_generated(&self, generated: &str, deterministic: &str) -> bool {
        let generated = generated.trim();
        let min_chars =
            (deterministic.chars().count() as f64 * self.config.min_adapted_ratio).ceil() as usize;
        !generated.is_empty() && generated.chars().count() >= min_chars
    }
}

fn adaptation_prompt(response: &str, context: &ConversationContext) -> String {
    let field = |key: &str| context.lookup(key).unwrap_or_else(|| "-".to_string());
    format!(
        "Adapt this customer-service reply to the conversation. Keep its meaning \
         and answer with the adapted reply only.\n\n\
         Reply: {}\nCustomer: {}\nPlatform: {}\nIntent: {}\nLast message: {}",
        response,
        field("sender_name"),
        field("platform"),
        field("current_intent"),
        field("current_message"),
    )
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace `{key}` with the context value; unknown keys are dropped
fn fill_placeholders(template: &str, context: &ConversationContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) if is_placeholder_key(&after[..end]) => {
                if let Some(value) = context.lookup(&after[..end]) {
                    out.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse whitespace and drop spaces left before punctuation
fn tidy(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for mark in [",", ".", "!", "?", ";", ":"] {
        out = out.replace(&format!(" {}", mark), mark);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ApprovalStatus;
    use crate::utils::TokenOverlap;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    fn pattern(id: &str, trigger: &str, action: &str) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.into(),
            pattern_type: "product_inquiry".into(),
            description: format!("product_inquiry: {}", trigger),
            trigger: trigger.into(),
            action: action.into(),
            confidence: 0.8,
            frequency: 5,
            context_tags: vec![],
            conditions: vec![],
            supporting_conversations: Default::default(),
            status: ApprovalStatus::Approved,
            metadata: Default::default(),
            created_at: now,
            last_seen: now,
            version: 1,
        }
    }

    fn engine() -> BehaviorEngine {
        BehaviorEngine::new(
            BehaviorConfig::default(),
            Arc::new(TokenOverlap),
            &TimeoutConfig::default(),
        )
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _prompt: &str) -> SiccResult<String> {
            Ok("  Hi Ana! The blue model is in stock and ships today.  ".into())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _prompt: &str) -> SiccResult<String> {
            Err(SiccError::Other(anyhow::anyhow!("upstream 500")))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _prompt: &str) -> SiccResult<String> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("too late".into())
        }
    }

    #[test]
    fn test_find_applicable_filters_and_orders() {
        let mut pending = pattern("pending", "do you have blue shoes", "yes");
        pending.status = ApprovalStatus::Pending;
        let mut single = pattern("single", "do you have blue shoes", "yes");
        single.frequency = 1;
        let patterns = vec![
            pattern("partial", "blue shoes price list", "here"),
            pattern("exact", "do you have blue shoes", "yes we do"),
            pattern("unrelated", "cancel my subscription", "sorry"),
            pending,
            single,
        ];

        let found = engine()
            .find_applicable("Do you have blue shoes?", &ConversationContext::default(), &patterns)
            .unwrap();
        let ids: Vec<_> = found.iter().map(|a| a.pattern.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "partial"]);
        assert_eq!(found[0].relevance_score, 1.0);
        assert!(found.iter().all(|a| a.relevance_score >= 0.3));
    }

    #[test]
    fn test_find_applicable_caps_results() {
        let patterns: Vec<_> = (0..10)
            .map(|i| pattern(&format!("p{}", i), "where is my order", "tracking"))
            .collect();

        let found = engine()
            .find_applicable("where is my order", &ConversationContext::default(), &patterns)
            .unwrap();
        assert_eq!(found.len(), 5);
        assert!(found.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
    }

    #[test]
    fn test_find_applicable_rejects_blank_message() {
        let err = engine()
            .find_applicable("  ", &ConversationContext::default(), &[])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_prioritize_weights() {
        let e = engine();
        let mut confident = pattern("confident", "a", "a");
        confident.confidence = 0.9;
        confident.frequency = 10;
        let mut popular = pattern("popular", "b", "b");
        popular.confidence = 0.6;
        popular.frequency = 100;

        let ranked = e.prioritize(vec![
            ApplicablePattern::new(confident, 0.5),
            ApplicablePattern::new(popular, 1.0),
        ]);
        assert_eq!(ranked[0].pattern.id, "popular");
    }

    #[test]
    fn test_prioritize_is_stable_permutation() {
        let e = engine();
        let mut stale = pattern("stale", "x", "x");
        stale.last_seen = Utc::now() - ChronoDuration::days(60);
        let input = vec![
            ApplicablePattern::new(pattern("a", "x", "x"), 0.5),
            ApplicablePattern::new(stale, 0.5),
            ApplicablePattern::new(pattern("b", "x", "x"), 0.5),
            ApplicablePattern::new(pattern("c", "x", "x"), 0.9),
        ];

        let first = e.prioritize(input.clone());
        let ids: Vec<_> = first.iter().map(|a| a.pattern.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "stale"]);

        for _ in 0..3 {
            let again: Vec<_> = e
                .prioritize(input.clone())
                .into_iter()
                .map(|a| a.pattern.id)
                .collect();
            assert_eq!(again, ids);
        }

        let single = vec![ApplicablePattern::new(pattern("only", "x", "x"), 0.1)];
        assert_eq!(e.prioritize(single.clone()), single);
    }

    #[tokio::test]
    async fn test_apply_requires_pattern() {
        let err = engine()
            .apply(None, &ConversationContext::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_apply_fills_template() {
        let ap = ApplicablePattern::new(
            pattern("p1", "blue shoes", "Hi {sender_name}, the blue model is in stock on {platform}."),
            0.9,
        );
        let ctx = ConversationContext::default()
            .with_sender("Ana")
            .with_platform("whatsapp");

        let result = engine().apply(Some(&ap), &ctx).await.unwrap();
        assert_eq!(
            result.response_text,
            "Hi Ana, the blue model is in stock on whatsapp."
        );
        assert_eq!(result.pattern_applied, "p1");
        assert_eq!(result.metadata["pattern_id"], json!("p1"));
        assert!(!result.adapted_by_llm);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[tokio::test]
    async fn test_apply_never_returns_blank() {
        let mut p = pattern("p1", "blue shoes", "   ");
        p.description = String::new();
        let ap = ApplicablePattern::new(p, 0.5);

        let result = engine().apply(Some(&ap), &ConversationContext::default()).await.unwrap();
        assert!(!result.response_text.trim().is_empty());
    }

    #[tokio::test]
    async fn test_apply_with_generator() {
        let e = engine().with_generator(Arc::new(EchoGenerator));
        let ap = ApplicablePattern::new(pattern("p1", "blue shoes", "The blue model is in stock."), 0.9);

        let result = e.apply(Some(&ap), &ConversationContext::default()).await.unwrap();
        assert!(result.adapted_by_llm);
        assert_eq!(
            result.response_text,
            "Hi Ana! The blue model is in stock and ships today."
        );
        assert_eq!(result.metadata["generator"], json!("echo"));
    }

    #[tokio::test]
    async fn test_apply_falls_back_when_generator_fails() {
        let ap = ApplicablePattern::new(pattern("p1", "blue shoes", "The blue model is in stock."), 0.9);

        let e = engine().with_generator(Arc::new(FailingGenerator));
        let result = e.apply(Some(&ap), &ConversationContext::default()).await.unwrap();
        assert!(!result.adapted_by_llm);
        assert_eq!(result.metadata["degraded"], json!(true));
        assert_eq!(result.response_text, "The blue model is in stock.");

        let timeouts = TimeoutConfig {
            llm_ms: 20,
            ..Default::default()
        };
        let e = BehaviorEngine::new(BehaviorConfig::default(), Arc::new(TokenOverlap), &timeouts)
            .with_generator(Arc::new(SlowGenerator));
        let result = e.apply(Some(&ap), &ConversationContext::default()).await.unwrap();
        assert!(!result.adapted_by_llm);
        assert_eq!(result.metadata["degraded"], json!(true));
    }

    #[test]
    fn test_adapt_guards_and_is_repeatable() {
        let e = engine();
        let ctx = ConversationContext::default().with_sender("Ana");

        assert_eq!(
            e.adapt("Hello {sender_name} , welcome back!", &ctx),
            "Hello Ana, welcome back!"
        );

        // Nothing to fill: dropping the placeholder would strip too much
        let bare = ConversationContext::default();
        assert_eq!(e.adapt("Hi {sender_name}", &bare), "Hi {sender_name}");

        for template in [
            "Thanks {sender_name}, your order {order_id} ships today.",
            "{a}{b}{c} ok",
            "plain text with   odd    spacing",
            "{ not a placeholder }",
        ] {
            let once = e.adapt(template, &ctx);
            assert!(!once.is_empty());
            assert!(once.chars().count() * 2 >= template.chars().count());
            let twice = e.adapt(&once, &ctx);
            assert!(!twice.is_empty());
        }
    }
}
