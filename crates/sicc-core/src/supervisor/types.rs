//! Supervisor Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agents::SubAgentType;
use crate::error::SiccError;

/// Admission status of a pattern or decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    NeedsReview,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsReview => "needs_review",
        }
    }

}

impl FromStr for ApprovalStatus {
    type Err = SiccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "needs_review" => Ok(Self::NeedsReview),
            other => Err(SiccError::validation(
                "status",
                format!("unknown approval status {:?}", other),
            )),
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of conflict between a candidate and an admitted pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TriggerSimilarity,
    ContextOverlap,
    ResponseContradiction,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerSimilarity => "trigger_similarity",
            Self::ContextOverlap => "context_overlap",
            Self::ResponseContradiction => "response_contradiction",
        }
    }
}

/// One detected conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    /// `<type>:<existing pattern id>`
    pub id: String,
    pub conflict_type: ConflictType,
    pub severity: f64,
    pub description: String,
    pub existing_pattern_id: String,
    /// Similarity, overlap or contradiction score that triggered the conflict
    pub score: f64,
}

/// Outcome of validating a candidate pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub pattern_id: String,
    pub has_conflicts: bool,
    /// Ordered by severity, descending
    pub conflicts: Vec<ConflictDetail>,
    /// Max of the individual severities, 0.0 when there are none
    pub severity_score: f64,
    pub recommendations: Vec<String>,
}

impl ConflictAnalysis {
    pub fn conflict_ids(&self) -> Vec<String> {
        self.conflicts.iter().map(|c| c.id.clone()).collect()
    }
}

/// An admission attempt awaiting a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningLog {
    pub id: String,
    pub pattern_id: String,
    pub confidence_score: f64,
    /// Sub-agent whose threshold override applies, if any
    pub sub_agent: Option<SubAgentType>,
    pub conflict_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LearningLog {
    pub fn new(pattern_id: impl Into<String>, confidence_score: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern_id: pattern_id.into(),
            confidence_score,
            sub_agent: None,
            conflict_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_sub_agent(mut self, agent: SubAgentType) -> Self {
        self.sub_agent = Some(agent);
        self
    }

    pub fn with_conflicts(mut self, conflict_ids: Vec<String>) -> Self {
        self.conflict_ids = conflict_ids;
        self
    }
}

/// Recorded admission decision; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub learning_log_id: String,
    pub pattern_id: String,
    pub status: ApprovalStatus,
    pub confidence_score: f64,
    pub threshold_used: f64,
    pub conflict_ids: Vec<String>,
    pub reason: String,
    pub approver: String,
    pub decided_at: DateTime<Utc>,
    /// Set iff `status` is approved
    pub approved_at: Option<DateTime<Utc>>,
}
