// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Browser Isolation - Application Layer
//!
//! Persistent per-(user, client) browser contexts and the sessions opened
//! inside them. A context's saved storage (cookies, local storage) is sealed
//! with the same envelope cipher as the credential vault, bound to the
//! context id through the associated data.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::audit::AuditLogger;
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::browser_context::{BrowserContext, ContextId, IsolatedSession, IsolationLevel, SessionConfig};
use crate::domain::config::BrowserConfig;
use crate::domain::crypto::EnvelopeCipher;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::ContextEvent;
use crate::domain::identity::{ClientId, UserId};
use crate::domain::repository::{BrowserContextRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

#[async_trait]
pub trait BrowserIsolationService: Send + Sync {
    /// Return the active context for (user, client), creating it on first use.
    async fn get_or_create_context(
        &self,
        user_id: UserId,
        client_id: ClientId,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<BrowserContext, ControlPlaneError>;

    async fn create_isolated_session(
        &self,
        user_id: UserId,
        context_id: ContextId,
        config: SessionConfig,
    ) -> Result<IsolatedSession, ControlPlaneError>;

    async fn save_context_storage(&self, user_id: UserId, context_id: ContextId, storage: &Value) -> Result<(), ControlPlaneError>;

    /// `None` when nothing has been saved yet.
    async fn load_context_storage(&self, user_id: UserId, context_id: ContextId) -> Result<Option<Value>, ControlPlaneError>;

    /// Best effort: failures are logged, never returned.
    async fn session_ended(&self, context_id: ContextId);

    /// Deactivate idle contexts with no live sessions. Returns the ids swept.
    async fn cleanup_inactive_contexts(&self) -> Result<Vec<ContextId>, ControlPlaneError>;

    async fn get_context(&self, user_id: UserId, context_id: ContextId) -> Result<BrowserContext, ControlPlaneError>;

    async fn list_contexts(&self, user_id: UserId) -> Result<Vec<BrowserContext>, ControlPlaneError>;
}

pub struct StandardBrowserIsolationService {
    repository: Arc<dyn BrowserContextRepository>,
    cipher: Arc<dyn EnvelopeCipher>,
    event_bus: EventBus,
    audit: AuditLogger,
    config: BrowserConfig,
}

impl StandardBrowserIsolationService {
    pub fn new(
        repository: Arc<dyn BrowserContextRepository>,
        cipher: Arc<dyn EnvelopeCipher>,
        event_bus: EventBus,
        audit: AuditLogger,
        config: BrowserConfig,
    ) -> Self {
        Self {
            repository,
            cipher,
            event_bus,
            audit,
            config,
        }
    }

    async fn load_owned(&self, user_id: UserId, context_id: ContextId) -> Result<BrowserContext, ControlPlaneError> {
        match self.repository.find_by_id(context_id).await? {
            Some(context) if context.user_id == user_id => Ok(context),
            Some(_) => Err(ControlPlaneError::AccessDenied(format!(
                "browser context {} belongs to another user",
                context_id
            ))),
            None => Err(ControlPlaneError::NotFound(format!("browser context {}", context_id))),
        }
    }

    async fn load_active(&self, user_id: UserId, context_id: ContextId) -> Result<BrowserContext, ControlPlaneError> {
        let context = self.load_owned(user_id, context_id).await?;
        if !context.is_active() {
            return Err(ControlPlaneError::InvalidStateTransition(format!(
                "browser context {} is inactive",
                context_id
            )));
        }
        Ok(context)
    }

    async fn record<T>(
        &self,
        user_id: UserId,
        action: &str,
        context_id: ContextId,
        details: Value,
        result: &Result<T, ControlPlaneError>,
    ) {
        let entry = match result {
            Ok(_) => AuditLogEntry::success(user_id, action, ResourceType::BrowserContext, context_id.to_string(), details),
            Err(e) => AuditLogEntry::failure(
                user_id,
                action,
                ResourceType::BrowserContext,
                context_id.to_string(),
                json!({ "error_code": e.code() }),
                e.to_string(),
            ),
        };
        self.audit.record(entry).await;
    }

    async fn create_context(
        &self,
        user_id: UserId,
        client_id: ClientId,
        isolation_level: IsolationLevel,
    ) -> Result<BrowserContext, ControlPlaneError> {
        let context = BrowserContext::new(user_id, client_id, isolation_level, self.config.context_ttl_days);
        match self.repository.insert(&context).await {
            Ok(()) => {
                info!(
                    context_id = %context.id,
                    user_id = %user_id,
                    client_id = %client_id,
                    isolation = isolation_level.as_str(),
                    "Created browser context"
                );
                self.event_bus.publish_context_event(ContextEvent::Created {
                    context_id: context.id,
                    user_id,
                    created_at: context.created_at,
                });
                self.record(
                    user_id,
                    "context.create",
                    context.id,
                    json!({ "client_id": client_id, "isolation_level": isolation_level.as_str() }),
                    &Ok::<(), ControlPlaneError>(()),
                )
                .await;
                Ok(context)
            }
            // Lost a creation race: the winner's row is the context.
            Err(RepositoryError::Conflict(_)) => self
                .repository
                .find_active(user_id, client_id)
                .await?
                .ok_or_else(|| {
                    ControlPlaneError::InvalidStateTransition(format!(
                        "browser context for user {} client {} was created and retired concurrently",
                        user_id, client_id
                    ))
                }),
            Err(e) => Err(e.into()),
        }
    }

    async fn do_save_storage(&self, user_id: UserId, context_id: ContextId, storage: &Value) -> Result<usize, ControlPlaneError> {
        self.load_active(user_id, context_id).await?;
        let plaintext = serde_json::to_vec(storage)
            .map_err(|e| ControlPlaneError::Validation(format!("unencodable storage state: {}", e)))?;
        let sealed = self
            .cipher
            .seal(&plaintext, &BrowserContext::storage_aad(context_id))
            .map_err(|e| ControlPlaneError::Configuration(e.to_string()))?;
        self.repository.update_storage(context_id, &sealed, Utc::now()).await?;
        Ok(plaintext.len())
    }

    async fn do_load_storage(&self, user_id: UserId, context_id: ContextId) -> Result<Option<Value>, ControlPlaneError> {
        let context = self.load_owned(user_id, context_id).await?;
        let Some(payload) = context.storage else {
            return Ok(None);
        };
        let opened = self
            .cipher
            .open(&payload, &BrowserContext::storage_aad(context_id))
            .map_err(|e| e.to_string())
            .and_then(|plaintext| serde_json::from_slice::<Value>(&plaintext).map_err(|e| format!("malformed plaintext: {}", e)));

        match opened {
            Ok(value) => Ok(Some(value)),
            Err(reason) => {
                metrics::counter!("agentgate_decryption_failures_total", "resource" => "browser_context").increment(1);
                error!(
                    context_id = %context_id,
                    user_id = %user_id,
                    "Browser context storage failed to decrypt; ciphertext may have been tampered with"
                );
                Err(ControlPlaneError::DecryptionFailure(reason))
            }
        }
    }
}

#[async_trait]
impl BrowserIsolationService for StandardBrowserIsolationService {
    async fn get_or_create_context(
        &self,
        user_id: UserId,
        client_id: ClientId,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<BrowserContext, ControlPlaneError> {
        if let Some(mut context) = self.repository.find_active(user_id, client_id).await? {
            let now = Utc::now();
            self.repository.touch(context.id, now).await?;
            context.last_used_at = now;
            debug!(context_id = %context.id, "Reusing browser context");
            return Ok(context);
        }

        let isolation = isolation_level.unwrap_or(self.config.default_isolation);
        self.create_context(user_id, client_id, isolation).await
    }

    async fn create_isolated_session(
        &self,
        user_id: UserId,
        context_id: ContextId,
        config: SessionConfig,
    ) -> Result<IsolatedSession, ControlPlaneError> {
        let mut context = self.load_active(user_id, context_id).await?;
        context.active_session_count = self.repository.increment_sessions(context_id).await?;
        let now = Utc::now();
        self.repository.touch(context_id, now).await?;
        context.last_used_at = now;

        let session = IsolatedSession::new(&context, config);
        info!(
            context_id = %context_id,
            session_id = %session.session_id,
            active_sessions = context.active_session_count,
            "Opened isolated browser session"
        );
        Ok(session)
    }

    async fn save_context_storage(&self, user_id: UserId, context_id: ContextId, storage: &Value) -> Result<(), ControlPlaneError> {
        let result = self.do_save_storage(user_id, context_id, storage).await;
        let details = match &result {
            Ok(bytes) => json!({ "plaintext_bytes": bytes }),
            Err(_) => Value::Null,
        };
        self.record(user_id, "context.save_storage", context_id, details, &result)
            .await;
        result.map(|_| ())
    }

    async fn load_context_storage(&self, user_id: UserId, context_id: ContextId) -> Result<Option<Value>, ControlPlaneError> {
        let result = self.do_load_storage(user_id, context_id).await;
        let details = match &result {
            Ok(storage) => json!({ "present": storage.is_some() }),
            Err(_) => Value::Null,
        };
        self.record(user_id, "context.load_storage", context_id, details, &result)
            .await;
        result
    }

    async fn session_ended(&self, context_id: ContextId) {
        match self.repository.decrement_sessions(context_id).await {
            Ok(remaining) => {
                debug!(context_id = %context_id, active_sessions = remaining, "Browser session ended");
                if let Err(e) = self.repository.touch(context_id, Utc::now()).await {
                    warn!(context_id = %context_id, error = %e, "Failed to touch browser context");
                }
            }
            Err(e) => warn!(context_id = %context_id, error = %e, "Failed to record browser session end"),
        }
    }

    async fn cleanup_inactive_contexts(&self) -> Result<Vec<ContextId>, ControlPlaneError> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(self.config.idle_days);
        let swept = self.repository.deactivate_idle(cutoff).await?;

        if !swept.is_empty() {
            metrics::counter!("agentgate_contexts_deactivated_total").increment(swept.len() as u64);
            for context_id in &swept {
                self.event_bus.publish_context_event(ContextEvent::Deactivated {
                    context_id: *context_id,
                    deactivated_at: now,
                });
            }
            info!(count = swept.len(), cutoff = %cutoff, "Deactivated idle browser contexts");
        }
        Ok(swept)
    }

    async fn get_context(&self, user_id: UserId, context_id: ContextId) -> Result<BrowserContext, ControlPlaneError> {
        self.load_owned(user_id, context_id).await
    }

    async fn list_contexts(&self, user_id: UserId) -> Result<Vec<BrowserContext>, ControlPlaneError> {
        Ok(self.repository.find_by_user(user_id).await?)
    }
}

/// Run `cleanup_inactive_contexts` every `period` until `shutdown` fires.
pub fn spawn_cleanup_task(
    service: Arc<dyn BrowserIsolationService>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Starting browser context sweeper");
        let mut tick = interval(period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match service.cleanup_inactive_contexts().await {
                        Ok(swept) => debug!(swept = swept.len(), "Context sweep completed"),
                        Err(e) => warn!(error = %e, "Context sweep failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping browser context sweeper");
                    break;
                }
            }
        }
    })
}
