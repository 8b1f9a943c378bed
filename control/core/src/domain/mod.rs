// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects, domain services and the
//! persistence contracts they depend on.

pub mod identity;
pub mod error;
pub mod crypto;
pub mod audit;
pub mod credential;
pub mod execution;
pub mod execution_control;
pub mod checkpoint;
pub mod approval;
pub mod risk;
pub mod browser_context;
pub mod events;
pub mod notification;
pub mod repository;
pub mod config;

pub use error::ControlPlaneError;
pub use identity::{ClientId, ExecutionId, UserId};
