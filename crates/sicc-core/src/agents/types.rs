//! Sub-Agent Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::SiccError;
use crate::learning::categories;

/// Specialized sub-agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentType {
    Discovery,
    Sales,
    Support,
}

impl SubAgentType {
    pub const ALL: [SubAgentType; 3] = [Self::Discovery, Self::Sales, Self::Support];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Sales => "sales",
            Self::Support => "support",
        }
    }
}

impl fmt::Display for SubAgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubAgentType {
    type Err = SiccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discovery" => Ok(Self::Discovery),
            "sales" => Ok(Self::Sales),
            "support" => Ok(Self::Support),
            other => Err(SiccError::validation(
                "agent_id",
                format!("unknown sub-agent {:?}", other),
            )),
        }
    }
}

/// Configuration of one sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub agent: SubAgentType,
    /// Minimum pattern confidence this agent accepts
    pub confidence_threshold: f64,
    /// Pattern categories the agent owns
    pub categories: BTreeSet<String>,
    /// Lower is more urgent; unique across the roster
    pub priority: u32,
    pub active: bool,
    #[serde(default)]
    pub description: String,
}

impl SubAgentConfig {
    /// Discovery, Sales and Support with their observed thresholds
    pub fn default_roster() -> Vec<SubAgentConfig> {
        vec![
            Self {
                agent: SubAgentType::Discovery,
                confidence_threshold: 0.6,
                categories: set(&[
                    categories::GREETING,
                    categories::PRODUCT_INQUIRY,
                    categories::NEEDS_DISCOVERY,
                ]),
                priority: 1,
                active: true,
                description: "Early-funnel qualification and needs discovery".into(),
            },
            Self {
                agent: SubAgentType::Sales,
                confidence_threshold: 0.8,
                categories: set(&[
                    categories::PRICE_OBJECTION,
                    categories::NEGOTIATION,
                    categories::CLOSING,
                ]),
                priority: 2,
                active: true,
                description: "Objection handling, negotiation and closing".into(),
            },
            Self {
                agent: SubAgentType::Support,
                confidence_threshold: 0.7,
                categories: set(&[
                    categories::SUPPORT_REQUEST,
                    categories::COMPLAINT,
                    categories::POST_SALE,
                ]),
                priority: 3,
                active: true,
                description: "Post-sale support and complaints".into(),
            },
        ]
    }
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Partial update applied by `configure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentUpdate {
    pub confidence_threshold: Option<f64>,
    pub categories: Option<BTreeSet<String>>,
    pub priority: Option<u32>,
    pub active: Option<bool>,
}

/// Placement of a pattern on a sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAssignment {
    pub pattern_id: String,
    pub agent: SubAgentType,
    pub confidence: f64,
    pub reason: String,
    pub assigned_at: DateTime<Utc>,
}

/// Per-agent assignment statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub assigned_patterns: usize,
    /// 0.0 for an agent with no assignments
    pub mean_confidence: f64,
}

/// JSON-serializable snapshot of the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigurationExport {
    pub agents: Vec<SubAgentConfig>,
    pub assignments: Vec<PatternAssignment>,
    /// Keyed by agent id
    pub stats: BTreeMap<String, AgentStats>,
    pub exported_at: DateTime<Utc>,
}
