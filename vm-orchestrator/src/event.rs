//! Fire-and-forget lifecycle event emission.
//!
//! Events flow through an in-process unbounded channel; draining and
//! persisting them is the event log service's job, not this crate's. The
//! orchestrator's obligation is enqueue-and-continue: emission never blocks,
//! never awaits acknowledgment, and never fails a lifecycle operation.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::entity::{now_millis, Operator};

pub const RESOURCE_TYPE_VM: &str = "vm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Creation,
    Start,
    Stop,
    Restart,
    Deletion,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmEvent {
    pub resource_type: String,
    pub resource_uid: String,
    pub event_type: EventKind,
    pub operator: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Optional free-text label qualifying the event, e.g. "recover".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl VmEvent {
    pub fn new(event_type: EventKind, resource_uid: &str, operator: &Operator) -> Self {
        Self {
            resource_type: RESOURCE_TYPE_VM.to_string(),
            resource_uid: resource_uid.to_string(),
            event_type,
            operator: operator.uid.clone(),
            created_at: now_millis(),
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }
}

/// Sending half of the event stream, cloned into every lifecycle task.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<VmEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the event log service drains.
    pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<VmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    /// Enqueue an event. A closed channel is logged and otherwise ignored.
    pub fn emit(&self, event: VmEvent) {
        if self.tx.send(event).is_err() {
            warn!("Event channel closed, dropping lifecycle event");
        }
    }
}
