//! Metric Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::agents::SubAgentType;
use crate::error::SiccError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Share of successful conversations, `[0, 1]`
    SuccessRate,
    /// Milliseconds, `>= 0`
    ResponseTime,
    /// Confidence of an applied pattern, `[0, 1]`
    PatternApplication,
    /// Share of admitted patterns among evaluated ones, `[0, 1]`
    LearningAccuracy,
    /// Customer-reported satisfaction, `[0, 1]`
    UserSatisfaction,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        Self::SuccessRate,
        Self::ResponseTime,
        Self::PatternApplication,
        Self::LearningAccuracy,
        Self::UserSatisfaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuccessRate => "success_rate",
            Self::ResponseTime => "response_time",
            Self::PatternApplication => "pattern_application",
            Self::LearningAccuracy => "learning_accuracy",
            Self::UserSatisfaction => "user_satisfaction",
        }
    }

    /// Whether `value` lies in this metric's domain
    pub fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Self::ResponseTime => value >= 0.0,
            _ => (0.0..=1.0).contains(&value),
        }
    }

    /// Higher-is-better ratio metrics
    pub fn is_quality(&self) -> bool {
        !matches!(self, Self::ResponseTime)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = SiccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| SiccError::validation("metric_type", format!("unknown metric {:?}", s)))
    }
}

/// One recorded sample; never mutated after recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: String,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<SubAgentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl PerformanceMetric {
    pub fn new(metric_type: MetricType, value: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metric_type,
            value,
            agent: None,
            pattern_id: None,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent: SubAgentType) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_pattern(mut self, pattern_id: impl Into<String>) -> Self {
        self.pattern_id = Some(pattern_id.into());
        self
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            count: values.len(),
            avg: values.iter().sum::<f64>() / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Running per-agent statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRollingStats {
    pub count: usize,
    /// Mean of the agent's quality metrics
    pub mean: f64,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    Unknown,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrative summary of the learning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub generated_at: DateTime<Utc>,
    pub total_metrics: usize,
    /// Count of `pattern_application` samples
    pub total_patterns_learned: usize,
    /// Pattern applications per hour over the trailing 24h
    pub learning_rate: f64,
    /// In `[0, 1]`
    pub system_accuracy: f64,
    /// Agent id or `unknown`
    pub top_performing_agent: String,
    pub trend: Trend,
    /// Keyed by metric type
    pub stats: BTreeMap<String, MetricStats>,
    /// Keyed by agent id
    pub agent_stats: BTreeMap<String, AgentRollingStats>,
    pub recommendations: Vec<String>,
}

/// JSON snapshot of recorded metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_hours: Option<u64>,
    pub metrics: Vec<PerformanceMetric>,
}
