//! SICC Configuration
//!
//! Tunables for every SICC component. All hand-tuned constants (conflict
//! thresholds, ranking weights, retention windows) live here with their
//! observed defaults so deployments can override them from `config.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::SubAgentConfig;

/// SICC configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiccConfig {
    /// Memory store configuration
    pub memory: MemoryConfig,

    /// Pattern extractor configuration
    pub learning: LearningConfig,

    /// Sub-agent roster
    pub agents: Vec<SubAgentConfig>,

    /// Conflict validator and approval gate configuration
    pub supervisor: SupervisorConfig,

    /// Pattern application engine configuration
    pub behavior: BehaviorConfig,

    /// Per-call time budgets
    pub timeouts: TimeoutConfig,

    /// Persistence configuration
    pub store: StoreConfig,

    /// Background maintenance configuration
    pub maintenance: MaintenanceConfig,
}

impl Default for SiccConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            learning: LearningConfig::default(),
            agents: SubAgentConfig::default_roster(),
            supervisor: SupervisorConfig::default(),
            behavior: BehaviorConfig::default(),
            timeouts: TimeoutConfig::default(),
            store: StoreConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Embedding vector dimension (default: 384)
    pub embedding_dimensions: usize,

    /// Retention window used by the maintenance sweep (default: 30 days)
    pub retention_days: i64,

    /// Memories below this relevance are eligible for cleanup (default: 0.3)
    pub cleanup_relevance_threshold: f64,

    /// Maximum live memories per conversation (default: 200)
    pub max_memories_per_conversation: usize,

    /// Context memories drawn from the same conversation (default: 3)
    pub local_context_limit: usize,

    /// Context memories drawn from other conversations (default: 2)
    pub global_context_limit: usize,

    /// Relevance assigned to new memories (default: 1.0)
    pub default_relevance: f64,

    /// Half-life used by relevance decay (default: 14 days)
    pub decay_half_life_days: f64,

    /// Context matches below this similarity are dropped (default: 0.1)
    pub min_context_similarity: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dimensions: 384,
            retention_days: 30,
            cleanup_relevance_threshold: 0.3,
            max_memories_per_conversation: 200,
            local_context_limit: 3,
            global_context_limit: 2,
            default_relevance: 1.0,
            decay_half_life_days: 14.0,
            min_context_similarity: 0.1,
        }
    }
}

/// Pattern extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Trigger similarity needed to join a cluster (default: 0.6)
    pub similarity_threshold: f64,

    /// Smallest cluster that becomes a pattern (default: 2)
    pub min_group_size: usize,

    /// Confidence saturation ceiling (default: 0.95)
    pub max_confidence: f64,

    /// Frequency at which confidence saturates (default: 10)
    pub frequency_divisor: f64,

    /// Stored conversations needed before a learning cycle runs (default: 2)
    pub min_conversations: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_group_size: 2,
            max_confidence: 0.95,
            frequency_divisor: 10.0,
            min_conversations: 2,
        }
    }
}

/// Conflict validator and approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Global approval threshold (default: 0.7)
    pub approval_threshold: f64,

    /// Trigger similarity strictly above this is a conflict (default: 0.7)
    pub trigger_similarity_threshold: f64,

    /// Context tag overlap at or above this is a conflict (default: 0.5)
    pub context_overlap_threshold: f64,

    /// Severity of a response contradiction (default: 0.8)
    pub contradiction_severity: f64,

    /// Aggregate severity above this asks for manual review (default: 0.8)
    pub manual_review_severity: f64,

    /// Conflict count above this asks for a redesign (default: 2)
    pub redesign_conflict_count: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 0.7,
            trigger_similarity_threshold: 0.7,
            context_overlap_threshold: 0.5,
            contradiction_severity: 0.8,
            manual_review_severity: 0.8,
            redesign_conflict_count: 2,
        }
    }
}

/// Pattern application engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Ranking weight of pattern confidence (default: 0.4)
    pub confidence_weight: f64,

    /// Ranking weight of request relevance (default: 0.3)
    pub relevance_weight: f64,

    /// Ranking weight of frequency (default: 0.2)
    pub frequency_weight: f64,

    /// Ranking weight of recency (default: 0.1)
    pub recency_weight: f64,

    /// Minimum relevance for a candidate pattern (default: 0.3)
    pub relevance_floor: f64,

    /// Maximum candidates returned per lookup (default: 5)
    pub max_applicable_patterns: usize,

    /// Days after which recency reaches zero (default: 30)
    pub recency_window_days: f64,

    /// Frequency at which the frequency score saturates (default: 100)
    pub frequency_normalizer: f64,

    /// Shortest adapted text, as a share of the template (default: 0.5)
    pub min_adapted_ratio: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.4,
            relevance_weight: 0.3,
            frequency_weight: 0.2,
            recency_weight: 0.1,
            relevance_floor: 0.3,
            max_applicable_patterns: 5,
            recency_window_days: 30.0,
            frequency_normalizer: 100.0,
            min_adapted_ratio: 0.5,
        }
    }
}

/// Per-call time budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole conversation turn (default: 30s)
    pub turn_ms: u64,

    /// Embedding generation (default: 5s)
    pub embedding_ms: u64,

    /// Store round-trip (default: 5s)
    pub store_ms: u64,

    /// LLM text generation (default: 10s)
    pub llm_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            turn_ms: 30_000,
            embedding_ms: 5_000,
            store_ms: 5_000,
            llm_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn turn(&self) -> Duration {
        Duration::from_millis(self.turn_ms)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn llm(&self) -> Duration {
        Duration::from_millis(self.llm_ms)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file (default: in-memory store)
    pub database_path: Option<PathBuf>,

    /// Attempts for transient store failures (default: 3)
    pub retry_attempts: u32,

    /// Linear backoff step between attempts (default: 100ms)
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retry_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Run the maintenance worker (default: true)
    pub enabled: bool,

    /// Seconds between maintenance passes (default: 3600 = 1 hour)
    pub interval_secs: u64,

    /// Open conversations untouched this long are closed as abandoned
    /// (default: 86400 = 1 day)
    pub idle_conversation_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600, // 1 hour
            idle_conversation_secs: 86_400,
        }
    }
}

impl SiccConfig {
    /// Create a config backed by a SQLite database at `database_path`
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                database_path: Some(database_path.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set learning configuration
    pub fn with_learning(mut self, learning: LearningConfig) -> Self {
        self.learning = learning;
        self
    }

    /// Replace the sub-agent roster
    pub fn with_agents(mut self, agents: Vec<SubAgentConfig>) -> Self {
        self.agents = agents;
        self
    }

    /// Set supervisor configuration
    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Set behavior configuration
    pub fn with_behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.behavior = behavior;
        self
    }

    /// Set timeout configuration
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set maintenance configuration
    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.memory.embedding_dimensions == 0 {
            return Err(invalid("memory.embedding_dimensions", "must be greater than 0"));
        }

        if self.memory.retention_days < 0 {
            return Err(invalid("memory.retention_days", "must not be negative"));
        }

        if self.memory.max_memories_per_conversation == 0 {
            return Err(invalid(
                "memory.max_memories_per_conversation",
                "must be greater than 0",
            ));
        }

        if !(self.memory.decay_half_life_days > 0.0) {
            return Err(invalid("memory.decay_half_life_days", "must be greater than 0"));
        }

        if self.learning.min_group_size < 2 {
            return Err(invalid("learning.min_group_size", "must be at least 2"));
        }

        if !(self.learning.frequency_divisor > 0.0) {
            return Err(invalid("learning.frequency_divisor", "must be greater than 0"));
        }

        if self.behavior.max_applicable_patterns == 0 {
            return Err(invalid(
                "behavior.max_applicable_patterns",
                "must be greater than 0",
            ));
        }

        if !(self.behavior.recency_window_days > 0.0) {
            return Err(invalid("behavior.recency_window_days", "must be greater than 0"));
        }

        if !(self.behavior.frequency_normalizer > 0.0) {
            return Err(invalid("behavior.frequency_normalizer", "must be greater than 0"));
        }

        let unit_fields = [
            ("memory.cleanup_relevance_threshold", self.memory.cleanup_relevance_threshold),
            ("memory.default_relevance", self.memory.default_relevance),
            ("memory.min_context_similarity", self.memory.min_context_similarity),
            ("learning.similarity_threshold", self.learning.similarity_threshold),
            ("learning.max_confidence", self.learning.max_confidence),
            ("supervisor.approval_threshold", self.supervisor.approval_threshold),
            (
                "supervisor.trigger_similarity_threshold",
                self.supervisor.trigger_similarity_threshold,
            ),
            (
                "supervisor.context_overlap_threshold",
                self.supervisor.context_overlap_threshold,
            ),
            ("supervisor.contradiction_severity", self.supervisor.contradiction_severity),
            ("supervisor.manual_review_severity", self.supervisor.manual_review_severity),
            ("behavior.confidence_weight", self.behavior.confidence_weight),
            ("behavior.relevance_weight", self.behavior.relevance_weight),
            ("behavior.frequency_weight", self.behavior.frequency_weight),
            ("behavior.recency_weight", self.behavior.recency_weight),
            ("behavior.relevance_floor", self.behavior.relevance_floor),
            ("behavior.min_adapted_ratio", self.behavior.min_adapted_ratio),
        ];

        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "must be between 0 and 1"));
            }
        }

        let weight_sum = self.behavior.confidence_weight
            + self.behavior.relevance_weight
            + self.behavior.frequency_weight
            + self.behavior.recency_weight;
        if weight_sum <= 0.0 {
            return Err(invalid("behavior", "ranking weights must not all be zero"));
        }

        let mut agents = BTreeSet::new();
        let mut priorities = BTreeSet::new();
        for agent in &self.agents {
            let field = format!("agents.{}", agent.agent.as_str());

            if !(0.0..=1.0).contains(&agent.confidence_threshold) {
                return Err(invalid(
                    format!("{}.confidence_threshold", field),
                    "must be between 0 and 1",
                ));
            }
            if agent.priority < 1 {
                return Err(invalid(format!("{}.priority", field), "must be at least 1"));
            }
            if !agents.insert(agent.agent) {
                return Err(invalid(field, "declared more than once"));
            }
            if !priorities.insert(agent.priority) {
                return Err(invalid(
                    format!("{}.priority", field),
                    format!("priority {} is already taken", agent.priority),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
