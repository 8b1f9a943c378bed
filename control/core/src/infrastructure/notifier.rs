// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use tracing::info;

use crate::domain::identity::UserId;
use crate::domain::notification::Notifier;

/// Notifier that only emits a structured log line. Used when no delivery
/// channel is wired in (CLI daemon, tests).
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: UserId, message: &str) {
        info!(user_id = %user_id, message, "user notification");
    }
}
