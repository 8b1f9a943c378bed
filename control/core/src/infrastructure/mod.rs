// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod db;
pub mod event_bus;
pub mod notifier;
pub mod repositories;

pub use crypto::{AesGcmCipher, MasterKey};
pub use event_bus::{DomainEvent, EventBus, EventBusError};
pub use notifier::LogNotifier;
