//! Learning command.
//!
//! Loads finished conversations from a JSON file, stores them and runs a
//! learning cycle: extraction, conflict validation, approval and routing.

use anyhow::{Context, Result};
use colored::Colorize;
use sicc_core::ConversationRecord;
use sicc_core::learning::LearningReport;
use std::path::Path;

use super::{open_service, print_json};
use crate::config::Config;

pub async fn execute(input: &Path, json: bool, config: &Config) -> Result<()> {
    let records = read_conversations(input)?;
    let service = open_service(config).await?;

    let ingested = service
        .ingest_conversations(&records)
        .await
        .context("Failed to store conversations")?;
    let report = service
        .run_learning_cycle()
        .await
        .context("Learning cycle failed")?;

    if json {
        return print_json(&report);
    }

    println!("{} Ingested {} conversation(s)", "✓".green(), ingested);
    print_report(&report, config.sicc.learning.min_conversations);
    Ok(())
}

fn read_conversations(input: &Path) -> Result<Vec<ConversationRecord>> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of conversations", input.display()))
}

fn print_report(report: &LearningReport, min_conversations: usize) {
    println!();
    println!("  {}", "Learning Cycle:".cyan());
    println!("  Conversations analyzed: {}", report.conversations_analyzed);

    if report.conversations_analyzed < min_conversations {
        println!(
            "  {}",
            format!("Need at least {} conversations to learn", min_conversations).yellow()
        );
        return;
    }

    println!("  Patterns extracted: {}", report.patterns_extracted);
    println!("  Approved: {}", report.approved.to_string().green());
    println!("  Needs review: {}", report.needs_review.to_string().yellow());
    println!("  Rejected: {}", report.rejected.to_string().red());
    println!("  Assigned to sub-agents: {}", report.assigned);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_conversations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(
            &path,
            r#"[{"id": "c1", "messages": [{"role": "customer", "content": "hi"}], "context_tags": ["discovery"]}]"#,
        )
        .unwrap();

        let records = read_conversations(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trigger(), Some("hi"));
    }

    #[test]
    fn test_read_conversations_rejects_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, r#"{"id": "c1"}"#).unwrap();

        assert!(read_conversations(&path).is_err());
    }
}
