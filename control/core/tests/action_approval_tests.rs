// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use agentgate_core::application::ApprovalOptions;
use agentgate_core::domain::approval::{
    ActionApproval, ApprovalDisplayState, ApprovalStatus, ApprovalTicket, ProposedAction, RiskLevel, TimeoutAction,
};
use agentgate_core::domain::config::ControlPlaneSpec;
use agentgate_core::domain::credential::{CredentialSecret, NewCredential};
use agentgate_core::domain::execution_control::ControlState;
use agentgate_core::domain::identity::{ExecutionId, UserId};
use agentgate_core::domain::repository::ApprovalRepository;
use agentgate_core::domain::risk::assess_risk;
use agentgate_core::ControlPlaneError;
use chrono::{Duration as ChronoDuration, Utc};
use common::Harness;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const OWNER: UserId = UserId(7);

fn bulk_delete() -> ProposedAction {
    ProposedAction::new("delete")
        .with_description("Delete stale contacts")
        .with_params(json!({ "bulk": true }))
}

/// Insert a pending approval whose deadline has already passed.
async fn insert_expired(h: &Harness, exec: ExecutionId, timeout_action: TimeoutAction) -> ActionApproval {
    let action = bulk_delete();
    let assessment = assess_risk(&action);
    let mut approval = ActionApproval::new(exec, OWNER, action, assessment, 1, timeout_action, None).unwrap();
    approval.created_at = Utc::now() - ChronoDuration::minutes(2);
    approval.expires_at = Utc::now() - ChronoDuration::seconds(1);
    h.approvals.insert(&approval).await.unwrap();
    h.plane
        .execution_control
        .enter_awaiting_approval(OWNER, exec, "awaiting test approval")
        .await
        .unwrap();
    approval
}

#[tokio::test]
async fn test_end_to_end_high_risk_delete_is_approved() {
    let h = Harness::new();
    h.plane
        .vault
        .store(
            OWNER,
            NewCredential {
                name: "GHL admin".to_string(),
                service: "ghl".to_string(),
                data: CredentialSecret::Password {
                    username: "agency-admin".to_string(),
                    password: "s3cret-pass".to_string(),
                },
                metadata: json!({}),
            },
        )
        .await
        .unwrap();
    let exec = h.start_execution(42, 7).await;

    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    let approval_id = ticket.approval_id().expect("high-risk action needs a row");

    let view = h.plane.approvals.get_approval(OWNER, approval_id).await.unwrap();
    assert_eq!(view.approval.risk_level, RiskLevel::High);
    assert_eq!(view.display_state, ApprovalDisplayState::Pending);
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::AwaitingApproval
    );
    assert!(h.plane.execution_control.should_pause(exec).await.unwrap());
    assert_eq!(h.notifier.messages.lock().len(), 1);

    let approvals = h.plane.approvals.clone();
    let waiter = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        approvals.wait_for_approval(ticket, &cancel).await
    });

    h.plane
        .approvals
        .approve_action(OWNER, approval_id, Some("looks fine".to_string()))
        .await
        .unwrap();

    let proceed = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap().unwrap();
    assert!(proceed);
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::Running
    );
    let row = h.approvals.find_by_id(approval_id).await.unwrap().unwrap();
    assert_eq!(row.status, ApprovalStatus::Approved);
    assert_eq!(row.response_note.as_deref(), Some("looks fine"));
    assert!(row.responded_at.is_some());
}

#[tokio::test]
async fn test_low_risk_action_never_persists_a_row() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;

    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, ProposedAction::new("navigate"), ApprovalOptions::default())
        .await
        .unwrap();

    assert_eq!(ticket, ApprovalTicket::AutoApproved);
    assert!(h.approvals.find_by_execution(exec).await.unwrap().is_empty());
    assert!(h
        .plane
        .approvals
        .wait_for_approval(ticket, &CancellationToken::new())
        .await
        .unwrap());
    assert!(!h.plane.execution_control.should_pause(exec).await.unwrap());
}

#[tokio::test]
async fn test_resolution_event_wakes_waiter_before_next_poll() {
    let mut spec = ControlPlaneSpec::default();
    spec.approval.poll_interval_ms = 60_000;
    let h = Harness::with_spec(spec);
    let exec = h.start_execution(42, 7).await;

    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    let approval_id = ticket.approval_id().unwrap();

    let approvals = h.plane.approvals.clone();
    let waiter = tokio::spawn(async move { approvals.wait_for_approval(ticket, &CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.plane.approvals.reject_action(OWNER, approval_id, None).await.unwrap();

    let proceed = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap().unwrap();
    assert!(!proceed);
}

#[tokio::test]
async fn test_rejection_leaves_execution_parked() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();

    h.plane
        .approvals
        .reject_action(OWNER, ticket.approval_id().unwrap(), Some("not today".to_string()))
        .await
        .unwrap();

    assert!(!h.plane.approvals.wait_for_approval(ticket, &CancellationToken::new()).await.unwrap());
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::AwaitingApproval
    );
}

#[tokio::test]
async fn test_auto_cancel_after_configured_rejections() {
    let mut spec = ControlPlaneSpec::default();
    spec.approval.auto_cancel_after_rejections = Some(2);
    let h = Harness::with_spec(spec);
    let exec = h.start_execution(42, 7).await;

    for round in 0..2 {
        let ticket = h
            .plane
            .approvals
            .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
            .await
            .unwrap();
        h.plane
            .approvals
            .reject_action(OWNER, ticket.approval_id().unwrap(), None)
            .await
            .unwrap();

        let state = h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state;
        if round == 0 {
            assert_eq!(state, ControlState::AwaitingApproval);
        } else {
            assert_eq!(state, ControlState::Cancelled);
        }
    }
}

#[tokio::test]
async fn test_expired_approval_times_out_with_reject_policy() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let approval = insert_expired(&h, exec, TimeoutAction::Reject).await;

    let before = h.plane.approvals.get_approval(OWNER, approval.id).await.unwrap();
    assert_eq!(before.display_state, ApprovalDisplayState::Expired);

    let proceed = h
        .plane
        .approvals
        .wait_for_approval(ApprovalTicket::Pending(approval.id), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!proceed);

    let after = h.plane.approvals.get_approval(OWNER, approval.id).await.unwrap();
    assert_eq!(after.approval.status, ApprovalStatus::Timeout);
    assert_eq!(after.display_state, ApprovalDisplayState::TimedOut);
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::AwaitingApproval
    );
}

#[tokio::test]
async fn test_expired_approval_with_approve_policy_resumes() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let approval = insert_expired(&h, exec, TimeoutAction::Approve).await;

    let proceed = h
        .plane
        .approvals
        .wait_for_approval(ApprovalTicket::Pending(approval.id), &CancellationToken::new())
        .await
        .unwrap();

    assert!(proceed);
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::Running
    );
}

#[tokio::test]
async fn test_approving_after_deadline_is_rejected() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let approval = insert_expired(&h, exec, TimeoutAction::Reject).await;

    let err = h
        .plane
        .approvals
        .approve_action(OWNER, approval.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidStateTransition(_)));

    let row = h.approvals.find_by_id(approval.id).await.unwrap().unwrap();
    assert_eq!(row.status, ApprovalStatus::Timeout);
}

#[tokio::test]
async fn test_cancelled_wait_leaves_row_pending() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = timeout(Duration::from_secs(5), h.plane.approvals.wait_for_approval(ticket, &cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::Cancelled));

    let row = h.approvals.find_by_id(ticket.approval_id().unwrap()).await.unwrap().unwrap();
    assert_eq!(row.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn test_resolution_is_final() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    let id = ticket.approval_id().unwrap();

    h.plane.approvals.approve_action(OWNER, id, None).await.unwrap();

    let again = h.plane.approvals.approve_action(OWNER, id, None).await.unwrap_err();
    let flip = h.plane.approvals.reject_action(OWNER, id, None).await.unwrap_err();
    assert!(matches!(again, ControlPlaneError::InvalidStateTransition(_)));
    assert!(matches!(flip, ControlPlaneError::InvalidStateTransition(_)));
    assert_eq!(
        h.approvals.find_by_id(id).await.unwrap().unwrap().status,
        ApprovalStatus::Approved
    );
}

#[tokio::test]
async fn test_other_users_cannot_resolve_or_read() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    let id = ticket.approval_id().unwrap();

    let approve = h.plane.approvals.approve_action(UserId(8), id, None).await.unwrap_err();
    let read = h.plane.approvals.get_approval(UserId(8), id).await.unwrap_err();
    assert!(matches!(approve, ControlPlaneError::AccessDenied(_)));
    assert!(matches!(read, ControlPlaneError::AccessDenied(_)));

    let foreign_request = h
        .plane
        .approvals
        .request_approval(UserId(8), exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(foreign_request, ControlPlaneError::AccessDenied(_)));
}

#[tokio::test]
async fn test_pending_list_is_oldest_first_and_history_is_kept() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;

    let first = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h
        .plane
        .approvals
        .request_approval(
            OWNER,
            exec,
            ProposedAction::new("purchase").with_description("buy 10 seats"),
            ApprovalOptions {
                timeout_minutes: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let pending = h.plane.approvals.get_pending_approvals(OWNER).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|v| v.approval.id).collect();
    assert_eq!(ids, vec![first.approval_id().unwrap(), second.approval_id().unwrap()]);

    h.plane
        .approvals
        .approve_action(OWNER, first.approval_id().unwrap(), None)
        .await
        .unwrap();
    assert_eq!(h.plane.approvals.get_pending_approvals(OWNER).await.unwrap().len(), 1);
    assert_eq!(h.plane.approvals.list_for_execution(OWNER, exec).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_approval_requests_are_audited() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    h.plane
        .approvals
        .approve_action(OWNER, ticket.approval_id().unwrap(), None)
        .await
        .unwrap();

    let actions: Vec<String> = h.audit_actions().into_iter().map(|(a, _)| a).collect();
    assert!(actions.contains(&"approval.request".to_string()));
    assert!(actions.contains(&"approval.approve".to_string()));
    assert!(actions.contains(&"execution.await_approval".to_string()));
    assert!(actions.contains(&"execution.resume".to_string()));
}

#[tokio::test]
async fn test_concurrent_resolutions_have_one_winner() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    let ticket = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap();
    let id = ticket.approval_id().unwrap();

    let (approved, rejected) = futures::future::join(
        h.plane.approvals.approve_action(OWNER, id, None),
        h.plane.approvals.reject_action(OWNER, id, None),
    )
    .await;

    assert_eq!(approved.is_ok() as u8 + rejected.is_ok() as u8, 1);
    let status = h.approvals.find_by_id(id).await.unwrap().unwrap().status;
    if approved.is_ok() {
        assert_eq!(status, ApprovalStatus::Approved);
    } else {
        assert_eq!(status, ApprovalStatus::Rejected);
    }
}

#[tokio::test]
async fn test_oversized_timeout_is_a_validation_error() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;

    let options = ApprovalOptions {
        timeout_minutes: Some(1_000_000_000_000),
        ..ApprovalOptions::default()
    };
    let err = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), options)
        .await
        .unwrap_err();

    assert!(matches!(err, ControlPlaneError::Validation(_)));
    assert!(h.plane.approvals.list_for_execution(OWNER, exec).await.unwrap().is_empty());
    assert_eq!(
        h.plane.execution_control.get_state(OWNER, exec).await.unwrap().state,
        ControlState::Running
    );
}

#[tokio::test]
async fn test_request_for_cancelled_execution_closes_the_row() {
    let h = Harness::new();
    let exec = h.start_execution(42, 7).await;
    h.plane.execution_control.cancel(OWNER, exec, "stopped").await.unwrap();

    let err = h
        .plane
        .approvals
        .request_approval(OWNER, exec, bulk_delete(), ApprovalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidStateTransition(_)));

    let history = h.plane.approvals.list_for_execution(OWNER, exec).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].approval.status, ApprovalStatus::Rejected);
    assert!(h.plane.approvals.get_pending_approvals(OWNER).await.unwrap().is_empty());
}
