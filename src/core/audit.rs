//! Audit trail of coordination decisions.
//!
//! Every lifecycle step a coordinator takes for a task (announce, execute,
//! reconcile, timeout, ...) can be recorded to a sink for later inspection.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Lifecycle step recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Task accepted into the graph and scheduler.
    Submit,
    /// Announcement published.
    Announce,
    /// This peer started executing a task.
    Execute,
    /// This peer published a completion record.
    Complete,
    /// Originator applied a completion record.
    Reconcile,
    /// Completion arrived for an already reconciled task.
    DuplicateDiscarded,
    /// No completion before the deadline.
    Timeout,
    /// Task announced again after a timeout.
    Reannounce,
    /// Task cancelled.
    Cancel,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submit => "submit",
            Self::Announce => "announce",
            Self::Execute => "execute",
            Self::Complete => "complete",
            Self::Reconcile => "reconcile",
            Self::DuplicateDiscarded => "duplicate_discarded",
            Self::Timeout => "timeout",
            Self::Reannounce => "reannounce",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Related task identifier.
    pub task_id: String,
    /// Peer that recorded the event.
    pub peer: String,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit sink for testing and dev.
///
/// Clones share the same buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events for one task and action.
    pub fn matching(&self, task_id: &str, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id && e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    task_id: impl Into<String>,
    peer: impl Into<String>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        task_id: task_id.into(),
        peer: peer.into(),
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
