//! Service Results
//!
//! Structured results returned to the transport layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::behavior::{ApplicablePattern, ResponseResult};
use crate::error::SiccError;
use crate::types::ConversationOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStart {
    pub conversation_id: String,
    pub applicable_patterns: Vec<ApplicablePattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEnd {
    pub conversation_id: String,
    pub outcome: ConversationOutcome,
    pub learning_initiated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternApplication {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseResult>,
    /// Why nothing was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Success,
    Timeout,
    Error,
    Ignored,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one conversation turn; never an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseResult>,
    pub applicable_patterns: usize,
    pub context_memories: usize,
    /// Some collaborator timed out and the turn continued without it
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl TurnOutcome {
    pub(crate) fn failed(
        conversation_id: &str,
        status: TurnStatus,
        error: &SiccError,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status,
            response: None,
            applicable_patterns: 0,
            context_memories: 0,
            degraded: false,
            error: Some(error.to_string()),
            elapsed_ms,
        }
    }

    pub(crate) fn ignored(conversation_id: &str, reason: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status: TurnStatus::Ignored,
            response: None,
            applicable_patterns: 0,
            context_memories: 0,
            degraded: false,
            error: Some(reason.to_string()),
            elapsed_ms: 0,
        }
    }
}

/// Result of a maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub memories_removed: usize,
    pub memories_decayed: usize,
    /// Idle conversations closed as abandoned
    pub conversations_closed: usize,
}
