//! Intelligence report command.
//!
//! Combines the persisted cache state (patterns by status, assignments,
//! memories) with the report over the stored metric history.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use sicc_core::memory::MemoryStats;
use sicc_core::metrics::IntelligenceReport;
use sicc_core::supervisor::ApprovalStatus;
use std::collections::BTreeMap;

use super::{open_service, print_json};
use crate::config::Config;

/// Full report for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    /// Pattern counts keyed by approval status
    pub patterns: BTreeMap<String, usize>,
    pub assignments: usize,
    pub memory: MemoryStats,
    pub intelligence: IntelligenceReport,
}

pub async fn execute(json: bool, config: &Config) -> Result<()> {
    let service = open_service(config).await?;

    let mut patterns = BTreeMap::new();
    for pattern in service.patterns(None).await? {
        *patterns.entry(pattern.status.as_str().to_string()).or_insert(0) += 1;
    }

    let report = CacheReport {
        patterns,
        assignments: service.router().assignments().await.len(),
        memory: service.memory().stats().await?,
        intelligence: service.intelligence_report().await,
    };

    if json {
        return print_json(&report);
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &CacheReport) {
    let count = |status: ApprovalStatus| report.patterns.get(status.as_str()).copied().unwrap_or(0);

    println!("{}", "SICC Report".cyan().bold());
    println!();
    println!("  {}", "Patterns:".cyan());
    println!("    Approved: {}", count(ApprovalStatus::Approved).to_string().green());
    println!("    Needs review: {}", count(ApprovalStatus::NeedsReview).to_string().yellow());
    println!("    Rejected: {}", count(ApprovalStatus::Rejected).to_string().red());
    println!("    Pending: {}", count(ApprovalStatus::Pending));
    println!("    Assigned: {}", report.assignments);

    println!();
    println!("  {}", "Memory:".cyan());
    println!("    Live: {}", report.memory.live_memories);
    println!("    Deleted: {}", report.memory.deleted_memories);
    println!("    Conversations: {}", report.memory.conversations);
    println!("    Mean relevance: {:.2}", report.memory.mean_relevance);

    let intelligence = &report.intelligence;
    println!();
    println!("  {}", "Performance:".cyan());
    println!("    Metrics recorded: {}", intelligence.total_metrics);
    println!("    Patterns applied: {}", intelligence.total_patterns_learned);
    println!("    Learning rate: {:.2}/h", intelligence.learning_rate);
    println!("    System accuracy: {:.0}%", intelligence.system_accuracy * 100.0);
    println!("    Top agent: {}", intelligence.top_performing_agent);
    println!("    Trend: {}", intelligence.trend);

    if !intelligence.recommendations.is_empty() {
        println!();
        println!("  {}", "Recommendations:".cyan());
        for recommendation in &intelligence.recommendations {
            println!("    • {}", recommendation);
        }
    }
}
