//! Pattern Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::supervisor::ApprovalStatus;

/// Pattern categories inferred by the extractor
pub mod categories {
    pub const GREETING: &str = "greeting";
    pub const PRODUCT_INQUIRY: &str = "product_inquiry";
    pub const NEEDS_DISCOVERY: &str = "needs_discovery";
    pub const PRICE_OBJECTION: &str = "price_objection";
    pub const NEGOTIATION: &str = "negotiation";
    pub const CLOSING: &str = "closing";
    pub const SUPPORT_REQUEST: &str = "support_request";
    pub const COMPLAINT: &str = "complaint";
    pub const POST_SALE: &str = "post_sale";
    pub const GENERAL: &str = "general";
}

/// A learned trigger → action rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    /// Category, e.g. `product_inquiry`
    pub pattern_type: String,
    pub description: String,
    pub trigger: String,
    pub action: String,
    pub confidence: f64,
    /// Number of conversations backing the pattern
    pub frequency: u32,
    #[serde(default)]
    pub context_tags: Vec<String>,
    /// Sorted condition set, unique across extracted patterns
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub supporting_conversations: BTreeSet<String>,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl Pattern {
    /// Admitted and backed by at least two conversations
    pub fn is_servable(&self) -> bool {
        self.status == ApprovalStatus::Approved && self.frequency >= 2
    }
}

/// Inputs to a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternData {
    /// Supporting conversations
    pub frequency: u32,
    /// Share of supporting conversations that answered the same way
    pub consistency: f64,
    /// Share of supporting conversations that ended successfully
    pub success_rate: f64,
}

/// Result of a learning cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningReport {
    pub conversations_analyzed: usize,
    pub patterns_extracted: usize,
    pub approved: usize,
    pub rejected: usize,
    pub needs_review: usize,
    pub assigned: usize,
}
