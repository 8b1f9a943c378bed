// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Migrate Command
//!
//! `agentgate migrate` applies the control plane schema migrations embedded
//! at build time.
//!
//! ```bash
//! # Apply all pending migrations
//! agentgate migrate
//!
//! # Preview migrations without applying
//! agentgate migrate --dry-run
//! ```
//!
//! The database URL comes from `spec.database.url` (with `env:VAR` support)
//! or the `AGENTGATE_DATABASE_URL` override.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;

use agentgate_core::domain::config::{resolve_env_value, ControlPlaneConfig};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../control/core/migrations");

#[derive(Args)]
pub struct MigrateCommand {
    /// List pending migrations without applying them
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "agentgate migrate".bold().green());

    let config = ControlPlaneConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let database = config
        .spec
        .database
        .as_ref()
        .context("No database configured. Set spec.database.url or AGENTGATE_DATABASE_URL.")?;
    let url = resolve_env_value(&database.url)?;

    println!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .context("Failed to connect to database")?;

    // The tracking table does not exist before the first run.
    let applied_count = sqlx::query("SELECT version FROM _sqlx_migrations")
        .fetch_all(&pool)
        .await
        .map(|rows| rows.len())
        .unwrap_or(0);
    let total_migrations = MIGRATOR.iter().count();

    println!(
        "Migration status: {} applied, {} total available.",
        applied_count, total_migrations
    );

    if applied_count >= total_migrations {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if cmd.dry_run {
        println!("Pending migrations (dry run):");
        for migration in MIGRATOR.iter().skip(applied_count) {
            println!(" - {} {}", migration.version, migration.description);
        }
        return Ok(());
    }

    println!("Applying pending migrations...");
    MIGRATOR.run(&pool).await.context("Failed to apply migrations")?;
    println!("{}", "✓ Database updated successfully.".green());
    Ok(())
}
