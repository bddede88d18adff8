//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// SICC operator CLI
///
/// Learns response patterns from finished conversations and inspects the
/// pattern cache.
#[derive(Parser, Debug)]
#[command(name = "sicc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest conversations and run a learning cycle
    Learn {
        /// JSON file holding an array of conversation records
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect learned patterns
    Patterns(PatternsCommand),

    /// Sub-agent roster and routing
    Agents(AgentsCommand),

    /// Apply a pattern to a conversation
    Apply {
        /// Conversation ID
        #[arg(short, long)]
        conversation: String,

        /// Pattern ID
        #[arg(short, long)]
        pattern: String,

        /// Customer name used in the template
        #[arg(short, long)]
        sender: Option<String>,

        /// Current customer message, used to score relevance
        #[arg(short, long)]
        message: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Intelligence report
    Report {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export agent configuration and metrics
    Export {
        /// Only include metrics from the last N hours
        #[arg(short, long)]
        window_hours: Option<u64>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Conversation memory maintenance
    Memory(MemoryCommand),

    /// Configuration file management
    Config(ConfigCommand),

    /// Show version
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PatternsCommand {
    #[command(subcommand)]
    pub action: PatternsAction,
}

#[derive(Subcommand, Debug)]
pub enum PatternsAction {
    /// List patterns by confidence
    List {
        /// Only patterns assigned to this sub-agent
        #[arg(short, long)]
        agent: Option<String>,

        /// Only patterns with this status (pending, approved, rejected, needs_review)
        #[arg(short, long)]
        status: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a pattern and its approval history
    Show {
        /// Pattern ID
        id: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct AgentsCommand {
    #[command(subcommand)]
    pub action: AgentsAction,
}

#[derive(Subcommand, Debug)]
pub enum AgentsAction {
    /// List sub-agents with their assignment stats
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Update a sub-agent and save the roster to the config file
    Configure {
        /// Agent ID (discovery, sales, support)
        agent: String,

        /// Minimum pattern confidence (0.0 - 1.0)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Priority, unique across agents (1 is most urgent)
        #[arg(short, long)]
        priority: Option<u32>,

        /// Enable or disable the agent
        #[arg(short, long)]
        active: Option<bool>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct MemoryCommand {
    #[command(subcommand)]
    pub action: MemoryAction,
}

#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Remove old, low-relevance memories and decay the rest
    Cleanup {
        /// Retention window in days (defaults to the configured value)
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Show memory statistics
    Stats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}
