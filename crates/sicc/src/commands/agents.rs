//! Sub-agent roster commands.
//!
//! The roster lives in the config file; `configure` validates the update
//! against the running router before saving it back.

use anyhow::{Result, bail};
use colored::Colorize;
use sicc_core::SubAgentUpdate;

use super::{open_service, print_json};
use crate::cli::{AgentsAction, AgentsCommand};
use crate::config::Config;

pub async fn execute(cmd: AgentsCommand, config: Config) -> Result<()> {
    match cmd.action {
        AgentsAction::List { json } => list(json, &config).await,
        AgentsAction::Configure {
            agent,
            threshold,
            priority,
            active,
        } => {
            let update = SubAgentUpdate {
                confidence_threshold: threshold,
                categories: None,
                priority,
                active,
            };
            configure(&agent, update, config).await
        }
    }
}

async fn list(json: bool, config: &Config) -> Result<()> {
    let service = open_service(config).await?;

    if json {
        return print_json(&service.export_configuration().await);
    }

    let stats = service.router().stats().await;
    println!("{}", "Sub-agents:".cyan());
    for agent in service.router().agents().await {
        let agent_stats = stats.get(&agent.agent).cloned().unwrap_or_default();
        let state = if agent.active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!(
            "  {} {} (priority {}, threshold {:.2})",
            agent.agent.to_string().bold(),
            state,
            agent.priority,
            agent.confidence_threshold
        );
        println!(
            "      {} pattern(s), mean confidence {:.2}",
            agent_stats.assigned_patterns, agent_stats.mean_confidence
        );
        let categories: Vec<&str> = agent.categories.iter().map(String::as_str).collect();
        println!("      categories: {}", categories.join(", "));
    }
    Ok(())
}

async fn configure(agent: &str, update: SubAgentUpdate, mut config: Config) -> Result<()> {
    if update == SubAgentUpdate::default() {
        bail!("Nothing to change (pass --threshold, --priority or --active)");
    }

    let service = open_service(&config).await?;
    if !service.configure_agent(agent, update).await? {
        bail!("Update rejected for '{}': check threshold range and priority uniqueness", agent);
    }

    config.sicc.agents = service.router().agents().await;
    config.save()?;

    println!(
        "{} Updated {} and saved {}",
        "✓".green(),
        agent.cyan(),
        Config::config_path().display()
    );
    Ok(())
}
