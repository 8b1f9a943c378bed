// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane assembly
//!
//! Wires the five services over one repository set, one cipher and one event
//! bus. Hosts construct a [`ControlPlane`] once at startup and hand the
//! `Arc<dyn ...>` handles to the agent loop and dashboard handlers.

use std::sync::Arc;

use crate::application::action_approval::{ActionApprovalService, StandardActionApprovalService};
use crate::application::audit::AuditLogger;
use crate::application::browser_isolation::{BrowserIsolationService, StandardBrowserIsolationService};
use crate::application::credential_vault::{CredentialVault, StandardCredentialVault};
use crate::application::execution_control::{ExecutionControlService, StandardExecutionControlService};
use crate::application::repository_factory::Repositories;
use crate::domain::config::ControlPlaneSpec;
use crate::domain::crypto::EnvelopeCipher;
use crate::domain::notification::Notifier;
use crate::domain::repository::ExecutionRepository;
use crate::infrastructure::event_bus::EventBus;

#[derive(Clone)]
pub struct ControlPlane {
    pub event_bus: EventBus,
    pub audit: AuditLogger,
    /// Owner registry; the host records executions here when it starts them.
    pub executions: Arc<dyn ExecutionRepository>,
    pub vault: Arc<dyn CredentialVault>,
    pub execution_control: Arc<dyn ExecutionControlService>,
    pub approvals: Arc<dyn ActionApprovalService>,
    pub browser: Arc<dyn BrowserIsolationService>,
}

impl ControlPlane {
    pub fn new(
        spec: &ControlPlaneSpec,
        repositories: Repositories,
        cipher: Arc<dyn EnvelopeCipher>,
        notifier: Arc<dyn Notifier>,
        event_bus: EventBus,
    ) -> Self {
        let audit = AuditLogger::new(repositories.audit.clone());

        let vault: Arc<dyn CredentialVault> = Arc::new(StandardCredentialVault::new(
            repositories.credentials.clone(),
            cipher.clone(),
            audit.clone(),
        ));

        let execution_control: Arc<dyn ExecutionControlService> = Arc::new(StandardExecutionControlService::new(
            repositories.executions.clone(),
            repositories.controls.clone(),
            event_bus.clone(),
            audit.clone(),
        ));

        let approvals: Arc<dyn ActionApprovalService> = Arc::new(StandardActionApprovalService::new(
            repositories.approvals.clone(),
            repositories.executions.clone(),
            execution_control.clone(),
            notifier,
            event_bus.clone(),
            audit.clone(),
            spec.approval.clone(),
        ));

        let browser: Arc<dyn BrowserIsolationService> = Arc::new(StandardBrowserIsolationService::new(
            repositories.contexts.clone(),
            cipher,
            event_bus.clone(),
            audit.clone(),
            spec.browser.clone(),
        ));

        Self {
            event_bus,
            audit,
            executions: repositories.executions,
            vault,
            execution_control,
            approvals,
            browser,
        }
    }
}
