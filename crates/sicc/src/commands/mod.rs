//! Command implementations for sicc CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod agents;
pub mod apply;
pub mod config;
pub mod export;
pub mod learn;
pub mod memory;
pub mod patterns;
pub mod report;

use anyhow::{Context, Result};
use sicc_core::memory::Embedder;
use sicc_core::{SiccService, SqliteStore};
use std::sync::Arc;

use crate::config::Config;

/// Open the service over the configured SQLite database
pub async fn open_service(config: &Config) -> Result<SiccService> {
    config.ensure_dirs()?;
    let path = config.database_path();
    tracing::debug!(path = %path.display(), "Opening SICC database");
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    SiccService::new(config.sicc.clone(), Arc::new(store), embedder(config))
        .await
        .context("Failed to start SICC service")
}

#[cfg(not(feature = "embeddings"))]
fn embedder(config: &Config) -> Arc<dyn Embedder> {
    Arc::new(sicc_core::memory::HashingEmbedder::new(
        config.sicc.memory.embedding_dimensions,
    ))
}

#[cfg(feature = "embeddings")]
fn embedder(_config: &Config) -> Arc<dyn Embedder> {
    Arc::new(sicc_core::memory::FastEmbedder::new())
}

/// Pretty-print any serializable value
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
