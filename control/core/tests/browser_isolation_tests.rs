// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use agentgate_core::application::spawn_cleanup_task;
use agentgate_core::domain::browser_context::{ContextStatus, IsolationLevel, SessionConfig};
use agentgate_core::domain::identity::{ClientId, UserId};
use agentgate_core::domain::repository::BrowserContextRepository;
use agentgate_core::ControlPlaneError;
use chrono::{Duration as ChronoDuration, Utc};
use common::Harness;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const OWNER: UserId = UserId(7);
const CLIENT: ClientId = ClientId(3);

#[tokio::test]
async fn test_get_or_create_is_idempotent() {
    let h = Harness::new();
    let browser = &h.plane.browser;

    let first = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    let second = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    let other_client = browser.get_or_create_context(OWNER, ClientId(4), None).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.id, other_client.id);
    assert_eq!(first.isolation_level, IsolationLevel::Strict);
    assert!(second.last_used_at >= first.last_used_at);
    assert!(first.expires_at > first.created_at + ChronoDuration::days(29));
}

#[tokio::test]
async fn test_sessions_are_counted_and_floor_at_zero() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    let context = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();

    let a = browser
        .create_isolated_session(OWNER, context.id, SessionConfig::default())
        .await
        .unwrap();
    let b = browser
        .create_isolated_session(OWNER, context.id, SessionConfig::default())
        .await
        .unwrap();
    assert_ne!(a.session_id, b.session_id);
    assert_ne!(a.storage_partition, b.storage_partition);
    assert_eq!(h.contexts.find_by_id(context.id).await.unwrap().unwrap().active_session_count, 2);

    for _ in 0..3 {
        browser.session_ended(context.id).await;
    }
    assert_eq!(h.contexts.find_by_id(context.id).await.unwrap().unwrap().active_session_count, 0);
}

#[tokio::test]
async fn test_standard_isolation_shares_partition() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    let context = browser
        .get_or_create_context(OWNER, CLIENT, Some(IsolationLevel::Standard))
        .await
        .unwrap();

    let a = browser
        .create_isolated_session(OWNER, context.id, SessionConfig::default())
        .await
        .unwrap();
    let b = browser
        .create_isolated_session(OWNER, context.id, SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(a.storage_partition, b.storage_partition);
}

#[tokio::test]
async fn test_storage_round_trip_is_encrypted() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    let context = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();

    assert_eq!(browser.load_context_storage(OWNER, context.id).await.unwrap(), None);

    let state = json!({ "cookies": [{ "name": "session", "value": "abc123" }] });
    browser.save_context_storage(OWNER, context.id, &state).await.unwrap();

    let stored = h.contexts.find_by_id(context.id).await.unwrap().unwrap();
    let payload = stored.storage.expect("storage saved");
    assert!(!String::from_utf8_lossy(&payload.ciphertext).contains("abc123"));

    assert_eq!(browser.load_context_storage(OWNER, context.id).await.unwrap(), Some(state));
}

#[tokio::test]
async fn test_tampered_storage_fails_closed() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    let context = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    browser
        .save_context_storage(OWNER, context.id, &json!({ "origins": [] }))
        .await
        .unwrap();

    let mut payload = h.contexts.find_by_id(context.id).await.unwrap().unwrap().storage.unwrap();
    payload.auth_tag[0] ^= 0xff;
    h.contexts.update_storage(context.id, &payload, Utc::now()).await.unwrap();

    let err = browser.load_context_storage(OWNER, context.id).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::DecryptionFailure(_)));
    let (action, success) = h.audit_actions().pop().unwrap();
    assert_eq!(action, "context.load_storage");
    assert!(!success);
}

#[tokio::test]
async fn test_foreign_and_unknown_contexts() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    let context = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();

    let foreign = browser
        .create_isolated_session(UserId(8), context.id, SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(foreign, ControlPlaneError::AccessDenied(_)));

    let read = browser.load_context_storage(UserId(8), context.id).await.unwrap_err();
    assert!(matches!(read, ControlPlaneError::AccessDenied(_)));

    let unknown = browser
        .create_isolated_session(OWNER, agentgate_core::domain::browser_context::ContextId::new(), SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(unknown, ControlPlaneError::NotFound(_)));
}

#[tokio::test]
async fn test_cleanup_skips_recent_and_busy_contexts() {
    let h = Harness::new();
    let browser = &h.plane.browser;

    let idle = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    let busy = browser.get_or_create_context(OWNER, ClientId(4), None).await.unwrap();
    let fresh = browser.get_or_create_context(OWNER, ClientId(5), None).await.unwrap();

    let long_ago = Utc::now() - ChronoDuration::days(31);
    h.contexts.touch(idle.id, long_ago).await.unwrap();
    browser
        .create_isolated_session(OWNER, busy.id, SessionConfig::default())
        .await
        .unwrap();
    h.contexts.touch(busy.id, long_ago).await.unwrap();

    let swept = browser.cleanup_inactive_contexts().await.unwrap();
    assert_eq!(swept, vec![idle.id]);

    let idle_row = h.contexts.find_by_id(idle.id).await.unwrap().unwrap();
    assert!(matches!(idle_row.status, ContextStatus::Inactive { .. }));
    assert!(h.contexts.find_by_id(busy.id).await.unwrap().unwrap().is_active());
    assert!(h.contexts.find_by_id(fresh.id).await.unwrap().unwrap().is_active());

    let err = browser
        .create_isolated_session(OWNER, idle.id, SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidStateTransition(_)));

    let replacement = browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    assert_ne!(replacement.id, idle.id);
}

#[tokio::test]
async fn test_list_contexts_is_scoped_to_owner() {
    let h = Harness::new();
    let browser = &h.plane.browser;
    browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    browser.get_or_create_context(UserId(8), CLIENT, None).await.unwrap();

    let mine = browser.list_contexts(OWNER).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].user_id, OWNER);
}

#[tokio::test]
async fn test_cleanup_task_stops_on_shutdown() {
    let h = Harness::new();
    let idle = h.plane.browser.get_or_create_context(OWNER, CLIENT, None).await.unwrap();
    h.contexts.touch(idle.id, Utc::now() - ChronoDuration::days(40)).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_cleanup_task(h.plane.browser.clone(), Duration::from_millis(10), shutdown.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

    assert!(!h.contexts.find_by_id(idle.id).await.unwrap().unwrap().is_active());
}
