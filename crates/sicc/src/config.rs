//! Configuration management for sicc.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (SICC_CONFIG, SICC_HOME)
//! 2. Config file (~/.sicc/config.toml)
//! 3. Default values

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sicc_core::SiccConfig;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Paths
    #[serde(default)]
    pub paths: PathsConfig,

    /// Core tunables, passed through to the service
    #[serde(default)]
    pub sicc: SiccConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for sicc data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("SICC_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sicc")
}

impl Config {
    /// Load configuration from file or defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Config::default()
        };

        config.sicc.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Write the defaults unless a file already exists
    pub fn init(path: &Path, force: bool) -> Result<Self> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        let config = Self::default();
        config.save_to(path)?;
        Ok(config)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SICC_CONFIG") {
            PathBuf::from(path)
        } else {
            default_data_dir().join("config.toml")
        }
    }

    /// SQLite database location; configured path or `<data_dir>/sicc.db`
    pub fn database_path(&self) -> PathBuf {
        self.sicc
            .store
            .database_path
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("sicc.db"))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }
}
