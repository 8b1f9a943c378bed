// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound notification channel.
//!
//! Delivery (email, push, dashboard toast) is owned by another system. The
//! control plane only fires `notify` and never waits on or retries it.

use async_trait::async_trait;

use crate::domain::identity::UserId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, message: &str);
}
