//! Pattern inspection commands.

use anyhow::{Context, Result};
use colored::Colorize;
use sicc_core::supervisor::ApprovalStatus;
use sicc_core::{Pattern, SubAgentType};

use super::{open_service, print_json};
use crate::cli::{PatternsAction, PatternsCommand};
use crate::config::Config;

pub async fn execute(cmd: PatternsCommand, config: &Config) -> Result<()> {
    match cmd.action {
        PatternsAction::List {
            agent,
            status,
            json,
        } => list(agent.as_deref(), status.as_deref(), json, config).await,
        PatternsAction::Show { id } => show(&id, config).await,
    }
}

async fn list(agent: Option<&str>, status: Option<&str>, json: bool, config: &Config) -> Result<()> {
    let agent = agent.map(str::parse::<SubAgentType>).transpose()?;
    let status = status.map(str::parse::<ApprovalStatus>).transpose()?;
    let service = open_service(config).await?;
    let mut patterns = service.patterns(agent).await.context("Failed to list patterns")?;
    if let Some(status) = status {
        patterns.retain(|p| p.status == status);
    }

    if json {
        return print_json(&patterns);
    }

    if patterns.is_empty() {
        println!("{}", "No patterns learned yet".yellow());
        return Ok(());
    }

    println!("{}", format!("{} pattern(s):", patterns.len()).cyan());
    for pattern in &patterns {
        let assigned = service
            .router()
            .assignment(&pattern.id)
            .await
            .map(|a| a.agent.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} [{}] {} ({:.0}% confidence, {}x) → {}",
            pattern.id.dimmed(),
            status_label(pattern.status),
            pattern.pattern_type,
            pattern.confidence * 100.0,
            pattern.frequency,
            assigned
        );
        println!("      {}", truncate(&pattern.trigger, 72));
    }
    Ok(())
}

async fn show(id: &str, config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let pattern = service.pattern(id).await?;
    let decisions = service.decisions(Some(id)).await?;

    print_pattern(&pattern);

    println!();
    println!("  {}", "Approval History:".cyan());
    if decisions.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for decision in &decisions {
        println!(
            "    {} {} by {} (confidence {:.2}, threshold {:.2})",
            decision.decided_at.format("%Y-%m-%d %H:%M"),
            status_label(decision.status),
            decision.approver,
            decision.confidence_score,
            decision.threshold_used
        );
        println!("      {}", decision.reason);
    }
    Ok(())
}

fn print_pattern(pattern: &Pattern) {
    println!("{} {}", "Pattern".cyan(), pattern.id.bold());
    println!("  Type: {}", pattern.pattern_type);
    println!("  Status: {}", status_label(pattern.status));
    println!("  Confidence: {:.2}", pattern.confidence);
    println!("  Frequency: {}", pattern.frequency);
    println!("  Trigger: {}", pattern.trigger);
    println!("  Action: {}", pattern.action);
    if !pattern.context_tags.is_empty() {
        println!("  Tags: {}", pattern.context_tags.join(", "));
    }
    println!("  Version: {}", pattern.version);
    println!("  Last seen: {}", pattern.last_seen.format("%Y-%m-%d %H:%M"));
}

fn status_label(status: ApprovalStatus) -> colored::ColoredString {
    match status {
        ApprovalStatus::Approved => status.as_str().green(),
        ApprovalStatus::Rejected => status.as_str().red(),
        ApprovalStatus::NeedsReview => status.as_str().yellow(),
        ApprovalStatus::Pending => status.as_str().normal(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
    }
}
