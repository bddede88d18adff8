//! Configuration file commands.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::{ConfigAction, ConfigCommand};
use crate::config::Config;

pub fn execute(cmd: ConfigCommand) -> Result<()> {
    match cmd.action {
        ConfigAction::Init { force } => init(force),
        ConfigAction::Show => show(),
    }
}

fn init(force: bool) -> Result<()> {
    let path = Config::config_path();
    let config = Config::init(&path, force)?;

    println!("{} Wrote {}", "✓".green(), path.display().to_string().cyan());
    println!("  Database: {}", config.database_path().display());
    Ok(())
}

fn show() -> Result<()> {
    let path = Config::config_path();
    let config = Config::load()?;

    if path.exists() {
        println!("{}", format!("# {}", path.display()).dimmed());
    } else {
        println!("{}", "# defaults (no config file)".dimmed());
    }
    println!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}
