// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentgate risk`: run the classifier on a proposed action without
//! touching any state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use agentgate_core::domain::approval::{ProposedAction, RiskLevel};
use agentgate_core::domain::risk::assess_risk;

#[derive(Args)]
pub struct RiskCommand {
    /// Action type, e.g. delete, purchase, navigate
    #[arg(long)]
    action_type: String,

    /// Free-text description of the action
    #[arg(long, default_value = "")]
    description: String,

    /// Action parameters as JSON
    #[arg(long)]
    params: Option<String>,

    /// Print the assessment as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(cmd: RiskCommand) -> Result<()> {
    let mut action = ProposedAction::new(cmd.action_type).with_description(cmd.description);
    if let Some(raw) = cmd.params {
        let params = serde_json::from_str(&raw).context("--params must be valid JSON")?;
        action = action.with_params(params);
    }

    let assessment = assess_risk(&action);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
        return Ok(());
    }

    let level = match assessment.risk_level {
        RiskLevel::Low => assessment.risk_level.as_str().green(),
        RiskLevel::Medium => assessment.risk_level.as_str().yellow(),
        RiskLevel::High | RiskLevel::Critical => assessment.risk_level.as_str().red().bold(),
    };
    println!("Risk level: {}", level);
    println!("Requires approval: {}", assessment.requires_approval);
    if assessment.risk_factors.is_empty() {
        println!("Factors: {}", "(none)".dimmed());
    } else {
        println!("Factors:");
        for factor in &assessment.risk_factors {
            println!("  - {}", factor);
        }
    }
    Ok(())
}
