// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Control Plane Events
//
// In-memory event streaming over tokio broadcast channels. Approval waiters
// subscribe here so a human decision wakes them without waiting for the next
// poll. Events are lost on restart; the repositories stay authoritative.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::events::{ApprovalEvent, ContextEvent, ControlEvent};
use crate::domain::identity::ExecutionId;

/// Unified event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Control(ControlEvent),
    Approval(ApprovalEvent),
    Context(ContextEvent),
}

/// Event bus for publishing and subscribing to control plane events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity is the number of buffered events before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_control_event(&self, event: ControlEvent) {
        self.publish(DomainEvent::Control(event));
    }

    pub fn publish_approval_event(&self, event: ApprovalEvent) {
        self.publish(DomainEvent::Approval(event));
    }

    pub fn publish_context_event(&self, event: ContextEvent) {
        self.publish(DomainEvent::Context(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);
        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the resolution of one approval.
    pub fn subscribe_approval(&self, approval_id: ApprovalId) -> ApprovalResolutionReceiver {
        ApprovalResolutionReceiver {
            receiver: self.sender.subscribe(),
            approval_id,
        }
    }

    /// Subscribe to control transitions of one execution.
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionControlReceiver {
        ExecutionControlReceiver {
            receiver: self.sender.subscribe(),
            execution_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Yields the final status of a single approval, skipping everything else.
pub struct ApprovalResolutionReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    approval_id: ApprovalId,
}

impl ApprovalResolutionReceiver {
    pub async fn recv(&mut self) -> Result<ApprovalStatus, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Approval(ApprovalEvent::Resolved { approval_id, status, .. }) = event {
                if approval_id == self.approval_id {
                    return Ok(status);
                }
            }
        }
    }
}

/// Control events for one execution
pub struct ExecutionControlReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    execution_id: ExecutionId,
}

impl ExecutionControlReceiver {
    pub async fn recv(&mut self) -> Result<ControlEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Control(control) = event {
                let id = match &control {
                    ControlEvent::StateChanged { execution_id, .. } => *execution_id,
                    ControlEvent::InstructionInjected { execution_id, .. } => *execution_id,
                };
                if id == self.execution_id {
                    return Ok(control);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
