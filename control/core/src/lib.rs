// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agentgate Core
//!
//! Security and execution-control plane that sits between an autonomous
//! agent loop and its real-world side effects.
//!
//! # Architecture
//!
//! - **Domain:** aggregates, state machines, the risk classifier and the
//!   repository contracts.
//! - **Application:** the five services consumed by the agent loop and the
//!   dashboard (audit, vault, execution control, approvals, browser contexts).
//! - **Infrastructure:** AES-256-GCM envelope cipher, in-memory and PostgreSQL
//!   repositories, event bus, notifier.
//!
//! Services are constructed explicitly and shared as `Arc<dyn Trait>`; there
//! are no process-wide singletons.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
