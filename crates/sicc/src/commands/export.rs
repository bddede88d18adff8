//! Export command.
//!
//! Writes the agent roster, pattern assignments and recorded metrics as one
//! JSON document.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use sicc_core::agents::AgentConfigurationExport;
use sicc_core::metrics::MetricsExport;
use std::path::Path;

use super::{open_service, print_json};
use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub configuration: AgentConfigurationExport,
    pub metrics: MetricsExport,
}

pub async fn execute(window_hours: Option<u64>, output: Option<&Path>, config: &Config) -> Result<()> {
    let service = open_service(config).await?;
    let snapshot = Snapshot {
        configuration: service.export_configuration().await,
        metrics: service.export_metrics(window_hours).await,
    };

    let Some(path) = output else {
        return print_json(&snapshot);
    };

    let content = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    println!(
        "{} Exported {} assignment(s) and {} metric(s) to {}",
        "✓".green(),
        snapshot.configuration.assignments.len(),
        snapshot.metrics.metrics.len(),
        path.display()
    );
    Ok(())
}
