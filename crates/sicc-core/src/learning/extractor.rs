//! Pattern Extractor
//!
//! Clusters conversations by the similarity of their opening customer
//! message and turns every cluster of at least `min_group_size`
//! conversations into a candidate [`Pattern`]. A cluster in which no agent
//! ever replied has nothing to serve and yields no pattern.
//!
//! Clustering is greedy and order-independent: conversations are visited in
//! id order and each joins the most similar existing cluster whose
//! representative clears the similarity threshold.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::categories;
use super::types::{Pattern, PatternData};
use crate::config::LearningConfig;
use crate::error::SiccResult;
use crate::supervisor::ApprovalStatus;
use crate::types::ConversationRecord;
use crate::utils::{TextSimilarity, normalize_text, stable_id, tokenize, validate_finite};

/// Keyword table used by [`categorize`]; earlier rows win ties
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        categories::COMPLAINT,
        &[
            "complaint", "terrible", "awful", "angry", "disappointed", "refund", "worst",
            "unacceptable", "reclamacao", "reclamação", "pessimo", "péssimo", "reembolso",
            "absurdo",
        ],
    ),
    (
        categories::SUPPORT_REQUEST,
        &[
            "help", "problem", "issue", "error", "broken", "working", "support", "fix",
            "ajuda", "problema", "erro", "suporte", "defeito",
        ],
    ),
    (
        categories::POST_SALE,
        &[
            "delivery", "shipping", "tracking", "delivered", "arrived", "return", "exchange",
            "warranty", "entrega", "rastreio", "chegou", "troca", "garantia",
        ],
    ),
    (
        categories::PRICE_OBJECTION,
        &[
            "expensive", "price", "cost", "costs", "pricey", "cheaper", "much", "caro",
            "preco", "preço", "valor", "custa",
        ],
    ),
    (
        categories::NEGOTIATION,
        &[
            "discount", "deal", "offer", "installments", "coupon", "negotiate", "desconto",
            "parcelar", "parcelas", "cupom", "promocao", "promoção",
        ],
    ),
    (
        categories::CLOSING,
        &[
            "buy", "purchase", "order", "checkout", "pay", "payment", "comprar", "fechar",
            "pedido", "pagar", "pagamento",
        ],
    ),
    (
        categories::PRODUCT_INQUIRY,
        &[
            "product", "products", "available", "stock", "model", "size", "color", "colour",
            "catalog", "interested", "produto", "disponivel", "disponível", "modelo",
            "tamanho", "cor", "interessado", "interessada",
        ],
    ),
    (
        categories::NEEDS_DISCOVERY,
        &[
            "need", "needs", "looking", "recommend", "recommendation", "suggest", "prefer",
            "ideal", "preciso", "procurando", "recomenda", "indicar",
        ],
    ),
    (
        categories::GREETING,
        &[
            "hello", "hi", "hey", "morning", "afternoon", "evening", "greetings", "ola",
            "olá", "oi", "bom", "boa",
        ],
    ),
];

/// Infer a pattern category from text by keyword hits
pub fn categorize(text: &str) -> &'static str {
    let tokens = tokenize(text);
    let mut best = (categories::GENERAL, 0usize);

    for (category, keywords) in CATEGORY_KEYWORDS {
        let hits = keywords.iter().filter(|k| tokens.contains(**k)).count();
        if hits > best.1 {
            best = (*category, hits);
        }
    }

    best.0
}

/// Deterministic pattern id from the normalised trigger and sorted tags
pub fn pattern_id(normalized_trigger: &str, sorted_tags: &[String]) -> String {
    stable_id("pat", &[normalized_trigger, &sorted_tags.join(",")])
}

struct Cluster<'a> {
    representative: &'a str,
    members: Vec<&'a ConversationRecord>,
}

/// Groups conversations into candidate patterns
pub struct PatternExtractor {
    config: LearningConfig,
    similarity: Arc<dyn TextSimilarity>,
}

impl PatternExtractor {
    pub fn new(config: LearningConfig, similarity: Arc<dyn TextSimilarity>) -> Self {
        Self { config, similarity }
    }

    /// Saturating confidence for a cluster of `frequency` conversations
    pub fn frequency_confidence(&self, frequency: u32) -> f64 {
        (frequency as f64 / self.config.frequency_divisor)
            .min(self.config.max_confidence)
            .clamp(0.0, 1.0)
    }

    /// Blend frequency, consistency and success rate into `[0, 1]`
    ///
    /// Non-decreasing in `frequency` for fixed consistency and success rate.
    pub fn calculate_confidence_score(&self, data: &PatternData) -> SiccResult<f64> {
        validate_finite("consistency", data.consistency)?;
        validate_finite("success_rate", data.success_rate)?;

        let frequency = (data.frequency as f64 / self.config.frequency_divisor).min(1.0);
        let score = 0.5 * frequency
            + 0.3 * data.consistency.clamp(0.0, 1.0)
            + 0.2 * data.success_rate.clamp(0.0, 1.0);

        Ok(score.clamp(0.0, 1.0))
    }

    /// Cluster conversations and emit one pattern per sufficiently large group
    ///
    /// Identical input yields an identical pattern set; no two patterns share
    /// a description or a condition set.
    pub fn analyze_conversation_patterns(&self, conversations: &[ConversationRecord]) -> Vec<Pattern> {
        let mut candidates: Vec<(&ConversationRecord, &str)> = conversations
            .iter()
            .filter_map(|c| c.trigger().map(|t| (c, t)))
            .collect();
        candidates.sort_by(|a, b| a.0.id.cmp(&b.0.id).then_with(|| a.1.cmp(b.1)));

        let mut clusters: Vec<Cluster> = Vec::new();
        for (record, trigger) in candidates {
            let mut best: Option<(usize, f64)> = None;
            for (i, cluster) in clusters.iter().enumerate() {
                let score = self.similarity.similarity(cluster.representative, trigger);
                if score >= self.config.similarity_threshold
                    && best.is_none_or(|(_, s)| score > s)
                {
                    best = Some((i, score));
                }
            }

            match best {
                Some((i, _)) => clusters[i].members.push(record),
                None => clusters.push(Cluster {
                    representative: trigger,
                    members: vec![record],
                }),
            }
        }

        let mut patterns: Vec<Pattern> = Vec::new();
        let mut by_description: HashMap<String, usize> = HashMap::new();
        let mut by_conditions: HashMap<Vec<String>, usize> = HashMap::new();

        for cluster in &clusters {
            let unique: BTreeSet<&str> = cluster.members.iter().map(|m| m.id.as_str()).collect();
            if unique.len() < self.config.min_group_size {
                continue;
            }

            let Some(pattern) = self.build_pattern(cluster) else {
                tracing::debug!(
                    trigger = %cluster.representative,
                    conversations = unique.len(),
                    "Skipping cluster without an agent reply"
                );
                continue;
            };
            let duplicate = by_description
                .get(&pattern.description)
                .or_else(|| by_conditions.get(&pattern.conditions))
                .copied();

            match duplicate {
                Some(i) => {
                    let merged = self.absorb(patterns[i].clone(), &pattern);
                    patterns[i] = merged;
                }
                None => {
                    by_description.insert(pattern.description.clone(), patterns.len());
                    by_conditions.insert(pattern.conditions.clone(), patterns.len());
                    patterns.push(pattern);
                }
            }
        }

        patterns.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!(
            conversations = conversations.len(),
            clusters = clusters.len(),
            patterns = patterns.len(),
            "Analyzed conversation patterns"
        );
        patterns
    }

    /// Fold freshly extracted patterns into their stored versions
    ///
    /// Keeps `created_at`, admission status and version of the stored row,
    /// unions supporting conversations and recomputes frequency/confidence.
    pub fn merge_with_existing(&self, existing: &[Pattern], extracted: Vec<Pattern>) -> Vec<Pattern> {
        let by_id: HashMap<&str, &Pattern> = existing.iter().map(|p| (p.id.as_str(), p)).collect();

        extracted
            .into_iter()
            .map(|fresh| match by_id.get(fresh.id.as_str()) {
                Some(stored) => {
                    let mut merged = self.absorb((*stored).clone(), &fresh);
                    merged.action = fresh.action;
                    merged.pattern_type = fresh.pattern_type;
                    merged.description = fresh.description;
                    merged.conditions = fresh.conditions;
                    merged.metadata.extend(fresh.metadata);
                    merged
                }
                None => fresh,
            })
            .collect()
    }

    fn absorb(&self, mut into: Pattern, other: &Pattern) -> Pattern {
        into.supporting_conversations
            .extend(other.supporting_conversations.iter().cloned());
        into.frequency = into.supporting_conversations.len() as u32;
        into.confidence = self.frequency_confidence(into.frequency);
        into.created_at = into.created_at.min(other.created_at);
        into.last_seen = into.last_seen.max(other.last_seen);
        // Tags stay as they are: the id and conditions are derived from them
        into
    }

    fn build_pattern(&self, cluster: &Cluster) -> Option<Pattern> {
        let trigger = cluster.representative.trim().to_string();
        let normalized = normalize_text(&trigger);
        let pattern_type = categorize(&trigger);

        let tags: Vec<String> = cluster
            .members
            .iter()
            .flat_map(|m| m.context_tags.iter())
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let supporting: BTreeSet<String> = cluster.members.iter().map(|m| m.id.clone()).collect();
        let frequency = supporting.len() as u32;

        // Most common reply wins; ties go to the lexicographically smallest
        let mut replies: BTreeMap<&str, usize> = BTreeMap::new();
        for reply in cluster.members.iter().filter_map(|m| m.reply()) {
            *replies.entry(reply.trim()).or_default() += 1;
        }
        let (action, count) = replies
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        let action = action.to_string();
        let consistency = *count as f64 / cluster.members.len() as f64;

        let outcomes: Vec<f64> = cluster
            .members
            .iter()
            .filter_map(|m| m.outcome.map(|o| o.success_score()))
            .collect();
        let success_rate = if outcomes.is_empty() {
            None
        } else {
            Some(outcomes.iter().sum::<f64>() / outcomes.len() as f64)
        };

        let mut conditions = vec![
            format!("category:{}", pattern_type),
            format!("trigger:{}", normalized),
        ];
        conditions.extend(tags.iter().map(|t| format!("tag:{}", t)));
        conditions.sort();

        let created_at = cluster
            .members
            .iter()
            .map(|m| m.started_at)
            .min()
            .unwrap_or_else(Utc::now);
        let last_seen: DateTime<Utc> = cluster
            .members
            .iter()
            .map(|m| m.ended_at.unwrap_or(m.started_at))
            .max()
            .unwrap_or(created_at);

        let mut metadata = BTreeMap::new();
        metadata.insert("consistency".to_string(), json!(consistency));
        metadata.insert("sample_size".to_string(), json!(cluster.members.len()));
        if let Some(rate) = success_rate {
            metadata.insert("success_rate".to_string(), json!(rate));
        }

        Some(Pattern {
            id: pattern_id(&normalized, &tags),
            pattern_type: pattern_type.to_string(),
            description: format!("{}: customers saying \"{}\"", pattern_type, normalized),
            trigger,
            action,
            confidence: self.frequency_confidence(frequency),
            frequency,
            context_tags: tags,
            conditions,
            supporting_conversations: supporting,
            status: ApprovalStatus::Pending,
            metadata,
            created_at,
            last_seen,
            version: 0,
        })
    }
}
