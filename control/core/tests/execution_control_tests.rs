// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use agentgate_core::domain::checkpoint::{Checkpoint, CHECKPOINT_SCHEMA_VERSION};
use agentgate_core::domain::events::ControlEvent;
use agentgate_core::domain::execution::ExecutionStatus;
use agentgate_core::domain::execution_control::{ControlState, PauseOutcome};
use agentgate_core::domain::identity::{ExecutionId, UserId};
use agentgate_core::domain::repository::ExecutionRepository;
use agentgate_core::ControlPlaneError;
use common::Harness;
use std::time::Duration;
use tokio::time::timeout;

const OWNER: UserId = UserId(7);

#[tokio::test]
async fn test_pause_resume_round_trip() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    assert!(!control.should_pause(exec).await.unwrap());

    let outcome = control.pause(OWNER, exec, "operator review").await.unwrap();
    assert_eq!(outcome, PauseOutcome::Paused);
    assert!(control.should_pause(exec).await.unwrap());
    assert_eq!(
        h.executions.find_by_id(exec).await.unwrap().unwrap().status,
        ExecutionStatus::NeedsInput
    );

    control.resume(OWNER, exec).await.unwrap();
    assert!(!control.should_pause(exec).await.unwrap());
    assert_eq!(control.get_state(OWNER, exec).await.unwrap().state, ControlState::Running);
    assert_eq!(
        h.executions.find_by_id(exec).await.unwrap().unwrap().status,
        ExecutionStatus::Running
    );
}

#[tokio::test]
async fn test_pause_is_idempotent() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    control.pause(OWNER, exec, "first").await.unwrap();
    let second = control.pause(OWNER, exec, "second").await.unwrap();
    assert_eq!(second, PauseOutcome::AlreadyPaused);
}

#[tokio::test]
async fn test_resume_while_running_is_rejected() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;

    let err = h.plane.execution_control.resume(OWNER, exec).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidStateTransition(_)));

    let (action, success) = h.audit_actions().pop().unwrap();
    assert_eq!(action, "execution.resume");
    assert!(!success);
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    control.cancel(OWNER, exec, "user stopped run").await.unwrap();
    assert!(control.should_pause(exec).await.unwrap());
    assert_eq!(
        h.executions.find_by_id(exec).await.unwrap().unwrap().status,
        ExecutionStatus::Cancelled
    );

    for result in [
        control.cancel(OWNER, exec, "again").await,
        control.resume(OWNER, exec).await,
        control.pause(OWNER, exec, "late").await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(ControlPlaneError::InvalidStateTransition(_))));
    }
}

#[tokio::test]
async fn test_foreign_and_unknown_executions_are_denied() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    let foreign = control.pause(UserId(8), exec, "not mine").await.unwrap_err();
    let unknown = control.pause(OWNER, ExecutionId(999), "missing").await.unwrap_err();
    assert!(matches!(foreign, ControlPlaneError::AccessDenied(_)));
    assert!(matches!(unknown, ControlPlaneError::AccessDenied(_)));

    assert!(!control.should_pause(exec).await.unwrap());
}

#[tokio::test]
async fn test_injected_instruction_resumes_and_is_read_once() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    control.pause(OWNER, exec, "needs guidance").await.unwrap();
    let resumed = control
        .inject_instruction(OWNER, exec, "use the staging account instead")
        .await
        .unwrap();
    assert!(resumed);
    assert!(!control.should_pause(exec).await.unwrap());

    let first = control.get_injected_instruction(OWNER, exec).await.unwrap();
    let second = control.get_injected_instruction(OWNER, exec).await.unwrap();
    assert_eq!(first.as_deref(), Some("use the staging account instead"));
    assert_eq!(second, None);
}

#[tokio::test]
async fn test_empty_instruction_is_rejected() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;

    let err = h
        .plane
        .execution_control
        .inject_instruction(OWNER, exec, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::Validation(_)));
}

#[tokio::test]
async fn test_checkpoint_round_trip_and_version_gate() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    assert!(control.load_checkpoint(OWNER, exec).await.unwrap().is_none());

    let mut checkpoint = Checkpoint::new(3);
    checkpoint.error_count = 1;
    control.save_checkpoint(OWNER, exec, checkpoint.clone()).await.unwrap();
    assert_eq!(control.load_checkpoint(OWNER, exec).await.unwrap(), Some(checkpoint));

    let mut future = Checkpoint::new(4);
    future.schema_version = CHECKPOINT_SCHEMA_VERSION + 1;
    let err = control.save_checkpoint(OWNER, exec, future).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Validation(_)));
}

#[tokio::test]
async fn test_transitions_publish_state_changes() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let mut events = h.plane.event_bus.subscribe_execution(exec);

    h.plane.execution_control.pause(OWNER, exec, "look").await.unwrap();

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    match event {
        ControlEvent::StateChanged { from, to, reason, .. } => {
            assert_eq!(from, ControlState::Running);
            assert_eq!(to, ControlState::Paused);
            assert_eq!(reason.as_deref(), Some("look"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_every_transition_attempt_is_audited() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    control.pause(OWNER, exec, "a").await.unwrap();
    control.resume(OWNER, exec).await.unwrap();
    let _ = control.resume(OWNER, exec).await;
    control.cancel(OWNER, exec, "b").await.unwrap();

    assert_eq!(
        h.audit_actions(),
        vec![
            ("execution.pause".to_string(), true),
            ("execution.resume".to_string(), true),
            ("execution.resume".to_string(), false),
            ("execution.cancel".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn test_audit_outage_does_not_block_control() {
    let h = Harness::with_failing_audit();
    let exec = h.start_execution(42, 7).await;

    h.plane.execution_control.pause(OWNER, exec, "x").await.unwrap();
    assert!(h.plane.execution_control.should_pause(exec).await.unwrap());
}

#[tokio::test]
async fn test_pause_during_delivery_does_not_restore_instruction() {
    let h = Harness::with_slow_control_reads(Duration::from_millis(100));
    let exec = h.start_execution(42, 7).await;
    let control = h.plane.execution_control.clone();

    control.inject_instruction(OWNER, exec, "wire $500 to vendor").await.unwrap();

    let pausing = {
        let control = control.clone();
        tokio::spawn(async move { control.pause(OWNER, exec, "operator review").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let first = control.get_injected_instruction(OWNER, exec).await.unwrap();
    assert_eq!(first.as_deref(), Some("wire $500 to vendor"));

    pausing.await.unwrap().unwrap();
    assert_eq!(control.get_injected_instruction(OWNER, exec).await.unwrap(), None);
    assert!(control.should_pause(exec).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_checkpoint_and_instruction_both_persist() {
    let h = Harness::with_slow_control_reads(Duration::from_millis(50));
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    let checkpoint = Checkpoint::new(5);
    let (saved, injected) = tokio::join!(
        control.save_checkpoint(OWNER, exec, checkpoint.clone()),
        control.inject_instruction(OWNER, exec, "skip the export step"),
    );
    saved.unwrap();
    injected.unwrap();

    assert_eq!(control.load_checkpoint(OWNER, exec).await.unwrap(), Some(checkpoint));
    assert_eq!(
        control.get_injected_instruction(OWNER, exec).await.unwrap().as_deref(),
        Some("skip the export step")
    );
}

#[tokio::test]
async fn test_cancel_drops_undelivered_instruction() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let control = &h.plane.execution_control;

    control.inject_instruction(OWNER, exec, "retry the upload").await.unwrap();
    control.cancel(OWNER, exec, "stop").await.unwrap();

    assert_eq!(control.get_injected_instruction(OWNER, exec).await.unwrap(), None);
}
