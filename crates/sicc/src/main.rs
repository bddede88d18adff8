//! sicc - SICC operator CLI
//!
//! Drives the self-improving conversational cache against a local SQLite
//! database: learning runs, pattern and agent inspection, reports and
//! memory maintenance.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("sicc=info".parse()?);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    match cli.command {
        // Must work with a broken or missing config file
        Commands::Config(cmd) => commands::config::execute(cmd),
        Commands::Version => {
            println!("sicc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => run(command, config::Config::load()?).await,
    }
}

async fn run(command: Commands, config: config::Config) -> Result<()> {
    match command {
        Commands::Learn { input, json } => commands::learn::execute(&input, json, &config).await,
        Commands::Patterns(cmd) => commands::patterns::execute(cmd, &config).await,
        Commands::Agents(cmd) => commands::agents::execute(cmd, config).await,
        Commands::Apply {
            conversation,
            pattern,
            sender,
            message,
            json,
        } => {
            commands::apply::execute(
                &conversation,
                &pattern,
                sender.as_deref(),
                message.as_deref(),
                json,
                &config,
            )
            .await
        }
        Commands::Report { json } => commands::report::execute(json, &config).await,
        Commands::Export {
            window_hours,
            output,
        } => commands::export::execute(window_hours, output.as_deref(), &config).await,
        Commands::Memory(cmd) => commands::memory::execute(cmd, &config).await,
        Commands::Config(_) | Commands::Version => Ok(()),
    }
}
