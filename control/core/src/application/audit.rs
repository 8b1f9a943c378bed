// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use tracing::warn;

use crate::domain::audit::AuditLogEntry;
use crate::domain::repository::AuditLogRepository;

/// Best-effort audit writer shared by all services.
///
/// A failed append is logged and counted but never fails the operation it
/// describes; the audit trail must not become an availability dependency.
#[derive(Clone)]
pub struct AuditLogger {
    repository: Arc<dyn AuditLogRepository>,
}

impl AuditLogger {
    pub fn new(repository: Arc<dyn AuditLogRepository>) -> Self {
        Self { repository }
    }

    pub async fn record(&self, entry: AuditLogEntry) {
        if let Err(e) = self.repository.append(&entry).await {
            metrics::counter!("agentgate_audit_write_failures_total").increment(1);
            warn!(
                action = %entry.action,
                resource_type = %entry.resource_type,
                resource_id = %entry.resource_id,
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }
}
