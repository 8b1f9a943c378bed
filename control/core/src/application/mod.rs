// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: use-case services behind traits, plus the wiring that
//! assembles them.

pub mod audit;
pub mod credential_vault;
pub mod execution_control;
pub mod action_approval;
pub mod browser_isolation;
pub mod repository_factory;
pub mod control_plane;

pub use action_approval::{ActionApprovalService, ApprovalOptions, ApprovalView, StandardActionApprovalService};
pub use audit::AuditLogger;
pub use browser_isolation::{spawn_cleanup_task, BrowserIsolationService, StandardBrowserIsolationService};
pub use control_plane::ControlPlane;
pub use credential_vault::{CredentialVault, StandardCredentialVault};
pub use execution_control::{ExecutionControlService, StandardExecutionControlService};
pub use repository_factory::{create_repositories, Repositories};
