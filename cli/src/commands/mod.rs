// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the agentgate CLI

pub mod config;
pub mod daemon;
pub mod keygen;
pub mod migrate;
pub mod risk;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonArgs;
pub use self::migrate::MigrateCommand;
pub use self::risk::RiskCommand;
