// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Control Plane Configuration
//
// Defines the configuration schema for an agentgate control plane, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Master key source for envelope encryption
// - Approval gate defaults (timeouts, polling, rejection policy)
// - Browser context retention
// - Optional Postgres persistence and Prometheus metrics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::approval::{TimeoutAction, MAX_TIMEOUT_MINUTES};
use crate::domain::browser_context::IsolationLevel;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "agentgate.dev/v1";
pub const KIND: &str = "ControlPlaneConfig";

/// Top-level Kubernetes-style control plane manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// API version (must be "agentgate.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControlPlaneConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControlPlaneSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneSpec {
    #[serde(default)]
    pub encryption: EncryptionConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Absent: in-memory repositories (development and tests only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable carrying the 32-byte master key
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: i64,

    /// Fallback poll period for `wait_for_approval`; events usually win
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout_action")]
    pub default_timeout_action: TimeoutAction,

    /// Cancel the execution after this many rejected approvals. `None`: never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cancel_after_rejections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_context_ttl_days")]
    pub context_ttl_days: i64,

    #[serde(default = "default_idle_days")]
    pub idle_days: i64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default)]
    pub default_isolation: IsolationLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (supports "env:VAR_NAME")
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_key_env() -> String {
    "AGENTGATE_ENCRYPTION_KEY".to_string()
}

fn default_timeout_minutes() -> i64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_timeout_action() -> TimeoutAction {
    TimeoutAction::Reject
}

fn default_context_ttl_days() -> i64 {
    30
}

fn default_idle_days() -> i64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_max_connections() -> u32 {
    5
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: default_timeout_minutes(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_action: default_timeout_action(),
            auto_cancel_after_rejections: None,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            context_ttl_days: default_context_ttl_days(),
            idle_days: default_idle_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default_isolation: IsolationLevel::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "agentgate".to_string(),
                labels: None,
            },
            spec: ControlPlaneSpec::default(),
        }
    }
}

/// Resolve a value that may use the "env:VAR_NAME" indirection.
pub fn resolve_env_value(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var)
            .map_err(|_| anyhow::anyhow!("Environment variable '{}' referenced by config is not set", var)),
        None => Ok(value.to_string()),
    }
}

impl ControlPlaneConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. AGENTGATE_CONFIG_PATH environment variable
    /// 2. ./agentgate.yaml (working directory)
    /// 3. ~/.agentgate/config.yaml (user home)
    /// 4. /etc/agentgate/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AGENTGATE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./agentgate.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agentgate").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/agentgate/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Postgres when a `database` section is present, in-memory otherwise.
    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match &self.spec.database {
            Some(db) => Ok(StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: resolve_env_value(&db.url)?,
                max_connections: db.max_connections,
            })),
            None => Ok(StorageBackend::InMemory),
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AGENTGATE_DATABASE_URL") {
            tracing::info!("Environment override: AGENTGATE_DATABASE_URL");
            match self.spec.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.spec.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }

        if let Ok(val) = std::env::var("AGENTGATE_APPROVAL_POLL_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: AGENTGATE_APPROVAL_POLL_MS={}", ms);
                    self.spec.approval.poll_interval_ms = ms;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for AGENTGATE_APPROVAL_POLL_MS: '{}'. Expected milliseconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.encryption.key_env.is_empty() {
            anyhow::bail!("spec.encryption.key_env cannot be empty");
        }

        let approval = &self.spec.approval;
        if !(1..=MAX_TIMEOUT_MINUTES).contains(&approval.default_timeout_minutes) {
            anyhow::bail!(
                "spec.approval.default_timeout_minutes must be between 1 and {}",
                MAX_TIMEOUT_MINUTES
            );
        }
        if approval.poll_interval_ms == 0 {
            anyhow::bail!("spec.approval.poll_interval_ms must be greater than 0");
        }
        if approval.auto_cancel_after_rejections == Some(0) {
            anyhow::bail!("spec.approval.auto_cancel_after_rejections must be at least 1 when set");
        }

        let browser = &self.spec.browser;
        if browser.context_ttl_days < 1 {
            anyhow::bail!("spec.browser.context_ttl_days must be at least 1");
        }
        if browser.idle_days < 1 {
            anyhow::bail!("spec.browser.idle_days must be at least 1");
        }
        if browser.cleanup_interval_secs == 0 {
            anyhow::bail!("spec.browser.cleanup_interval_secs must be greater than 0");
        }

        if let Some(db) = &self.spec.database {
            if db.url.is_empty() {
                anyhow::bail!("spec.database.url cannot be empty");
            }
            if db.max_connections == 0 {
                anyhow::bail!("spec.database.max_connections must be greater than 0");
            }
        }

        Ok(())
    }
}
