// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use agentgate_core::domain::config::ControlPlaneConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./agentgate.yaml")]
        output: PathBuf,

        /// metadata.name of the generated manifest
        #[arg(long, default_value = "default")]
        name: String,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, name } => generate(&output, &name).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ControlPlaneConfig::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. AGENTGATE_CONFIG_PATH: {}",
            std::env::var("AGENTGATE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./agentgate.yaml");
        println!("  4. ~/.agentgate/config.yaml");
        println!("  5. /etc/agentgate/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{} {}", "Control plane:".bold(), config.metadata.name);
    println!();

    println!("{}", "Encryption:".bold());
    let key_state = if std::env::var(&spec.encryption.key_env).is_ok() {
        "set".green()
    } else {
        "NOT SET".red()
    };
    println!("  Key variable: {} ({})", spec.encryption.key_env, key_state);
    println!();

    println!("{}", "Approvals:".bold());
    println!("  Default timeout: {} min", spec.approval.default_timeout_minutes);
    println!("  Timeout action: {}", spec.approval.default_timeout_action.as_str());
    println!("  Poll interval: {} ms", spec.approval.poll_interval_ms);
    match spec.approval.auto_cancel_after_rejections {
        Some(n) => println!("  Auto-cancel after: {} rejections", n),
        None => println!("  Auto-cancel after: {}", "(never)".dimmed()),
    }
    println!();

    println!("{}", "Browser contexts:".bold());
    println!("  TTL: {} days, idle sweep after {} days", spec.browser.context_ttl_days, spec.browser.idle_days);
    println!("  Sweep interval: {} s", spec.browser.cleanup_interval_secs);
    println!("  Default isolation: {}", spec.browser.default_isolation.as_str());
    println!();

    println!("{}", "Storage:".bold());
    match &spec.database {
        Some(db) => println!("  PostgreSQL ({} connections max)", db.max_connections),
        None => println!("  In-memory {}", "(state is lost on restart)".yellow()),
    }
    if spec.metrics.enabled {
        println!("  Metrics: Prometheus on :{}", spec.metrics.port);
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControlPlaneConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

async fn generate(output: &Path, name: &str) -> Result<()> {
    let mut config = ControlPlaneConfig::default();
    config.metadata.name = name.to_string();

    config
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}
