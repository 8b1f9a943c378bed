// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resumability snapshot of an in-flight agent execution.
//!
//! The well-known parts of the loop state (conversation, plan, tool history,
//! counters) are typed. Anything the agent loop wants to carry beyond that goes
//! into `extensions`, an opaque JSON value versioned by `schema_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub iteration: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_history: Vec<ToolCallRecord>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub extensions: serde_json::Value,
}

fn default_schema_version() -> u32 {
    CHECKPOINT_SCHEMA_VERSION
}

impl Checkpoint {
    pub fn new(iteration: u32) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            iteration,
            error_count: 0,
            conversation: Vec::new(),
            plan: None,
            tool_history: Vec::new(),
            captured_at: Utc::now(),
            extensions: serde_json::Value::Null,
        }
    }

    /// Snapshots written by a newer agent loop cannot be rehydrated safely.
    pub fn is_supported(&self) -> bool {
        self.schema_version <= CHECKPOINT_SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_optional_fields_default() {
        let json = serde_json::json!({
            "iteration": 7,
            "captured_at": "2026-01-01T00:00:00Z"
        });
        let checkpoint: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(checkpoint.schema_version, CHECKPOINT_SCHEMA_VERSION);
        assert_eq!(checkpoint.iteration, 7);
        assert!(checkpoint.conversation.is_empty());
        assert!(checkpoint.is_supported());
    }

    #[test]
    fn test_future_schema_is_unsupported() {
        let mut checkpoint = Checkpoint::new(1);
        checkpoint.schema_version = CHECKPOINT_SCHEMA_VERSION + 1;
        assert!(!checkpoint.is_supported());
    }
}
