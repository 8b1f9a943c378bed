// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Risk Classifier
//!
//! Pure, deterministic classification of a [`ProposedAction`]. Identical input
//! always yields an identical level and an identical, ordered factor list.
//!
//! The rules are applied in a fixed order and the order is part of the
//! contract (audit parity depends on it):
//!
//! 1. start at `Low`;
//! 2. high-risk action types escalate to `High`;
//! 3. critical patterns over the serialized description and params jump to
//!    `Critical` and stop evaluation;
//! 4. each financial keyword ratchets one step, capped at `High`;
//! 5. a bulk flag ratchets `Low` to `Medium`;
//! 6. a production environment ratchets one more step.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::approval::{ProposedAction, RiskAssessment, RiskLevel};

pub const HIGH_RISK_ACTION_TYPES: &[&str] = &[
    "delete",
    "purchase",
    "payment",
    "send_email",
    "send_message",
    "shell_exec",
    "file_write",
    "database_modify",
];

pub const FINANCIAL_KEYWORDS: &[&str] = &["buy", "purchase", "payment", "charge", "transfer", "withdraw"];

const BULK_FLAGS: &[&str] = &["bulk", "multiple", "all"];

static CRITICAL_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "destructive SQL",
            r"(?i)\b(drop\s+(table|database|schema)|truncate\s+table|delete\s+from\s+\w+)\b",
        ),
        ("forced recursive delete", r"(?i)\brm\s+(-rf|-fr|--recursive\s+--force|--force\s+--recursive)\b"),
        ("privilege escalation", r"(?i)\b(sudo|su\s+root|chmod\s+(-R\s+)?777|chown\s+root)\b"),
        ("forced operation", r#"(?i)(--force\b|\bforce\s*=\s*true\b|"force"\s*:\s*true|\bpush\s+-f\b)"#),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("critical risk pattern is a valid regex")))
    .collect()
});

/// Classify an action. See the module docs for the rule order.
pub fn assess_risk(action: &ProposedAction) -> RiskAssessment {
    let mut level = RiskLevel::Low;
    let mut factors = Vec::new();

    if HIGH_RISK_ACTION_TYPES.contains(&action.action_type.as_str()) {
        level = RiskLevel::High;
        factors.push(format!("High-risk action type: {}", action.action_type));
    }

    let scanned = scan_text(action);

    if let Some((label, _)) = CRITICAL_PATTERNS.iter().find(|(_, re)| re.is_match(&scanned)) {
        factors.push(format!("Critical pattern detected: {}", label));
        return finish(RiskLevel::Critical, factors);
    }

    let lowered = scanned.to_lowercase();
    for keyword in FINANCIAL_KEYWORDS {
        if lowered.contains(keyword) {
            if level < RiskLevel::High {
                level = level.escalate();
            }
            factors.push(format!("Financial keyword: {}", keyword));
        }
    }

    if has_bulk_flag(&action.params) {
        if level == RiskLevel::Low {
            level = RiskLevel::Medium;
        }
        factors.push("Bulk operation".to_string());
    }

    if targets_production(&action.params) {
        level = level.escalate();
        factors.push("Production environment".to_string());
    }

    finish(level, factors)
}

fn finish(risk_level: RiskLevel, risk_factors: Vec<String>) -> RiskAssessment {
    RiskAssessment {
        risk_level,
        risk_factors,
        requires_approval: risk_level != RiskLevel::Low,
    }
}

fn scan_text(action: &ProposedAction) -> String {
    let params = if action.params.is_null() {
        String::new()
    } else {
        action.params.to_string()
    };
    format!("{} {}", action.description, params)
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn has_bulk_flag(params: &serde_json::Value) -> bool {
    BULK_FLAGS
        .iter()
        .any(|flag| params.get(flag).map(is_truthy).unwrap_or(false))
}

fn targets_production(params: &serde_json::Value) -> bool {
    ["environment", "env"].iter().any(|key| {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|env| env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod"))
            .unwrap_or(false)
    })
}
