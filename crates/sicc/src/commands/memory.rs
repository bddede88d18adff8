//! Memory maintenance commands.

use anyhow::{Context, Result};
use colored::Colorize;

use super::open_service;
use crate::cli::{MemoryAction, MemoryCommand};
use crate::config::Config;

pub async fn execute(cmd: MemoryCommand, config: &Config) -> Result<()> {
    match cmd.action {
        MemoryAction::Cleanup { days } => cleanup(days, config).await,
        MemoryAction::Stats => stats(config).await,
    }
}

async fn cleanup(days: Option<i64>, config: &Config) -> Result<()> {
    let service = open_service(config).await?;

    let report = match days {
        // Explicit window: sweep with it, then decay as usual
        Some(days) => {
            let removed = service
                .memory()
                .cleanup_old_memories(days)
                .await
                .context("Cleanup failed")?;
            let decayed = service
                .memory()
                .decay_relevance(config.sicc.memory.decay_half_life_days)
                .await
                .context("Relevance decay failed")?;
            (removed, decayed)
        }
        None => {
            let report = service.run_maintenance().await.context("Maintenance failed")?;
            (report.memories_removed, report.memories_decayed)
        }
    };

    println!("{} Removed {} memory(ies)", "✓".green(), report.0);
    println!("  Relevance decayed on {}", report.1);
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let stats = service.memory().stats().await?;

    println!("{}", "Memory Statistics:".cyan());
    println!("  Live memories: {}", stats.live_memories);
    println!("  Soft-deleted: {}", stats.deleted_memories);
    println!("  Conversations: {}", stats.conversations);
    println!("  Mean relevance: {:.2}", stats.mean_relevance);
    Ok(())
}
