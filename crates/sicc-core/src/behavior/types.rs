//! Behavior Types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SiccResult;
use crate::learning::Pattern;
use crate::types::ConversationContext;

/// A servable pattern matched against one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicablePattern {
    pub pattern: Pattern,
    /// Match quality for this request, in `[0, 1]`
    pub relevance_score: f64,
    /// Overrides the pattern's action when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
}

impl ApplicablePattern {
    pub fn new(pattern: Pattern, relevance_score: f64) -> Self {
        Self {
            pattern,
            relevance_score,
            response_template: None,
            context: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.response_template = Some(template.into());
        self
    }

    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Text the response is built from
    pub fn template(&self) -> &str {
        self.response_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.pattern.action)
    }
}

/// Outcome of applying a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub response_text: String,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Id of the applied pattern
    pub pattern_applied: String,
    pub adapted_by_llm: bool,
    /// Always carries `pattern_id`
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// LLM text generation used to adapt responses
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model or backend name, used in logs
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> SiccResult<String>;
}
