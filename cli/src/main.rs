// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # agentgate CLI
//!
//! Operator tooling for the agentgate control plane.
//!
//! ## Commands
//!
//! - `agentgate config show|validate|generate` - Configuration management
//! - `agentgate keygen` - Generate a master encryption key
//! - `agentgate risk` - Classify a proposed action
//! - `agentgate migrate [--dry-run]` - Apply database migrations
//! - `agentgate daemon` - Run background maintenance (context sweeps, metrics)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agentgate::commands::{self, ConfigCommand, DaemonArgs, MigrateCommand, RiskCommand};

/// agentgate - security and execution control for autonomous agents
#[derive(Parser)]
#[command(name = "agentgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AGENTGATE_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AGENTGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate a fresh base64 master key
    #[command(name = "keygen")]
    Keygen,

    /// Run the risk classifier on a proposed action
    #[command(name = "risk")]
    Risk(RiskCommand),

    /// Apply database migrations
    #[command(name = "migrate")]
    Migrate(MigrateCommand),

    /// Run the background maintenance daemon in the foreground
    #[command(name = "daemon")]
    Daemon(DaemonArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Keygen => commands::keygen::execute(),
        Commands::Risk(command) => commands::risk::execute(command),
        Commands::Migrate(command) => commands::migrate::execute(command, cli.config).await,
        Commands::Daemon(args) => commands::daemon::execute(args, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
