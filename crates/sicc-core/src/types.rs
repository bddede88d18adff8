//! Conversation Types
//!
//! Records shared by the learning loop and the request-time path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::agents::SubAgentType;
use crate::error::{SiccError, SiccResult};

// ─────────────────────────────────────────────────────────────────────────────
// Conversation context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request conversation context
///
/// The well-known fields are typed; anything else a channel sends lands in
/// `extra` and is still available to template placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Declared intent, usually a sub-agent id such as `sales`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_interaction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_message: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const KNOWN_FIELDS: [&str; 5] = [
    "sender_name",
    "platform",
    "current_intent",
    "previous_interaction",
    "current_message",
];

impl ConversationContext {
    /// Build a context from an untyped JSON value
    ///
    /// Fails with a validation error when `value` is not an object or when a
    /// well-known field holds something other than a string.
    pub fn from_json(value: &Value) -> SiccResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            SiccError::validation(
                "context",
                format!("must be a JSON object (got {})", json_kind(value)),
            )
        })?;

        let mut ctx = Self::default();
        for (key, val) in map {
            if KNOWN_FIELDS.contains(&key.as_str()) {
                let text = match val {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => {
                        return Err(SiccError::validation(
                            format!("context.{}", key),
                            format!("must be a string (got {})", json_kind(other)),
                        ));
                    }
                };
                match key.as_str() {
                    "sender_name" => ctx.sender_name = text,
                    "platform" => ctx.platform = text,
                    "current_intent" => ctx.current_intent = text,
                    "previous_interaction" => ctx.previous_interaction = text,
                    _ => ctx.current_message = text,
                }
            } else {
                ctx.extra.insert(key.clone(), val.clone());
            }
        }

        Ok(ctx)
    }

    pub fn with_sender(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = Some(sender_name.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.current_intent = Some(intent.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.current_message = Some(message.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Resolve a template placeholder name to its text value
    pub fn lookup(&self, key: &str) -> Option<String> {
        let known = match key {
            "sender_name" => self.sender_name.as_ref(),
            "platform" => self.platform.as_ref(),
            "current_intent" => self.current_intent.as_ref(),
            "previous_interaction" => self.previous_interaction.as_ref(),
            "current_message" => self.current_message.as_ref(),
            _ => {
                return self.extra.get(key).and_then(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                });
            }
        };
        known.cloned()
    }

    /// Serialize to a JSON object
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation records
// ─────────────────────────────────────────────────────────────────────────────

/// Who sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Customer,
    Agent,
    System,
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn customer(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Customer,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// How a conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationOutcome {
    Success,
    Partial,
    Failure,
    Abandoned,
}

impl ConversationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
            Self::Abandoned => "abandoned",
        }
    }

    /// Success-rate sample recorded when a conversation ends
    pub fn success_score(&self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Partial => 0.5,
            Self::Failure | Self::Abandoned => 0.0,
        }
    }
}

/// A finished (or in-flight) conversation, the unit the extractor learns from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context_tags: Vec<String>,
    #[serde(default)]
    pub sub_agent: Option<SubAgentType>,
    #[serde(default)]
    pub outcome: Option<ConversationOutcome>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            context_tags: Vec::new(),
            sub_agent: None,
            outcome: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.context_tags.push(tag.into());
        self
    }

    /// First non-empty customer message
    pub fn trigger(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::Customer && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }

    /// First non-empty agent message following the trigger
    pub fn reply(&self) -> Option<&str> {
        let start = self
            .messages
            .iter()
            .position(|m| m.role == MessageRole::Customer && !m.content.trim().is_empty())?;

        self.messages[start + 1..]
            .iter()
            .find(|m| m.role == MessageRole::Agent && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }
}
