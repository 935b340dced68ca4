//! Mutable coordinator state, guarded by a single mutex.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::core::graph::TaskGraph;
use crate::core::scheduler::PriorityScheduler;
use crate::core::task::{PayloadRef, ResultRef, TaskId, TaskStatus};

/// Coordination state of one distributable task.
///
/// The originator moves through Announced, TimedOut and Reconciled; every peer
/// that receives the announcement moves through Evaluating into
/// Responsible/NotResponsible and, when responsible, Executing then
/// Completed or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionState {
    /// Known but not yet announced.
    Idle,
    /// Announcement published, waiting for a completion.
    Announced,
    /// Computing responsibility for a received announcement.
    Evaluating,
    /// This peer won the task.
    Responsible,
    /// Another peer won the task.
    NotResponsible,
    /// Local executor running.
    Executing,
    /// Execution succeeded and the completion was published.
    Completed,
    /// Execution failed and the failure was published.
    Failed,
    /// No completion arrived before the deadline.
    TimedOut,
    /// Originator applied the completion.
    Reconciled,
    /// Cancelled by the originator.
    Cancelled,
}

impl fmt::Display for DistributionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Announced => "announced",
            Self::Evaluating => "evaluating",
            Self::Responsible => "responsible",
            Self::NotResponsible => "not_responsible",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Reconciled => "reconciled",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a task as seen by its originator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusView {
    /// Task identifier.
    pub task_id: TaskId,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Failure or cancellation reason.
    pub reason: Option<String>,
    /// Output reference once completed.
    pub result_ref: Option<ResultRef>,
    /// Coordination state for distributed tasks.
    pub distribution: Option<DistributionState>,
}

/// An announcement waiting for its completion.
#[derive(Debug)]
pub(super) struct Outstanding {
    pub payload: PayloadRef,
    pub attempt: u32,
    /// Peer expected to execute the current attempt.
    pub presumed: Option<String>,
    pub excluded: Vec<String>,
    /// Timeout timer or pending re-announcement.
    pub timer: Option<AbortHandle>,
}

impl Outstanding {
    pub(super) fn new(payload: PayloadRef) -> Self {
        Self {
            payload,
            attempt: 0,
            presumed: None,
            excluded: Vec::new(),
            timer: None,
        }
    }

    pub(super) fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A task this peer is executing on behalf of an announcer.
#[derive(Debug)]
pub(super) struct Execution {
    pub attempt: u32,
    pub handle: AbortHandle,
}

/// Peer-side key: task ids are only unique per originator.
pub(super) type ExecutionKey = (String, TaskId);

#[derive(Debug, Default)]
pub(super) struct CoordinatorState {
    pub scheduler: PriorityScheduler,
    pub graph: TaskGraph,
    /// Originator side: announced, not yet reconciled.
    pub outstanding: HashMap<TaskId, Outstanding>,
    /// Originator side: archived after reconciliation, final timeout or
    /// cancel, with the archive time.
    pub reconciled: HashMap<TaskId, Instant>,
    pub origin_states: HashMap<TaskId, DistributionState>,
    /// Local tasks running in-process.
    pub local_runs: HashMap<TaskId, AbortHandle>,
    /// Peer side.
    pub peer_states: HashMap<TaskId, DistributionState>,
    pub executions: HashMap<ExecutionKey, Execution>,
    /// `(announcer, task, attempt)` with the time it was first delivered.
    pub seen_announcements: HashMap<(String, TaskId, u32), Instant>,
    /// Membership.
    pub static_peers: BTreeSet<String>,
    pub last_seen: HashMap<String, Instant>,
}

impl CoordinatorState {
    pub(super) fn new<I: IntoIterator<Item = String>>(static_peers: I) -> Self {
        Self {
            static_peers: static_peers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Static peers plus peers heard from within `window`, excluding `self_id`.
    pub(super) fn membership(&self, self_id: &str, window: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut view: BTreeSet<&str> = self.static_peers.iter().map(String::as_str).collect();
        view.extend(
            self.last_seen
                .iter()
                .filter(|(_, seen)| now.duration_since(**seen) <= window)
                .map(|(peer, _)| peer.as_str()),
        );
        view.into_iter()
            .filter(|peer| *peer != self_id)
            .map(String::from)
            .collect()
    }

    pub(super) fn distribution(&self, task_id: &TaskId) -> Option<DistributionState> {
        self.origin_states
            .get(task_id)
            .or_else(|| self.peer_states.get(task_id))
            .copied()
    }

    pub(super) fn status_view(&self, task_id: &TaskId) -> Option<TaskStatusView> {
        let node = self.graph.get(task_id)?;
        Some(TaskStatusView {
            task_id: node.id.clone(),
            status: node.status,
            reason: node.failure_reason.clone(),
            result_ref: node.result.clone(),
            distribution: self.origin_states.get(task_id).copied(),
        })
    }

    /// Move Pending children of `id` whose dependencies are all complete to Ready.
    ///
    /// Call after `scheduler.reschedule_pending()`.
    pub(super) fn promote_children(&mut self, id: &TaskId) -> usize {
        let children = self.graph.children(id).to_vec();
        let mut promoted = 0;
        for child in children {
            let ready = self.graph.get(&child).is_some_and(|node| {
                node.status == TaskStatus::Pending
                    && node.dependencies.iter().all(|dep| {
                        self.graph
                            .get(dep)
                            .is_some_and(|parent| parent.status == TaskStatus::Completed)
                    })
            });
            if ready && self.graph.set_status(&child, TaskStatus::Ready, None).is_ok() {
                promoted += 1;
            }
        }
        promoted
    }

    /// Drop archived coordination records older than `retention`.
    ///
    /// Task nodes stay in the graph; only the bookkeeping that suppresses late
    /// duplicates goes. Peer states are dropped with the last announcement
    /// seen for their task unless an execution is still running. Returns the
    /// number of records dropped.
    pub(super) fn prune(&mut self, now: Instant, retention: Duration) -> usize {
        let expired = |at: &Instant| now.saturating_duration_since(*at) > retention;
        let before = self.record_count();

        let stale: Vec<TaskId> = self
            .reconciled
            .iter()
            .filter(|(_, archived)| expired(*archived))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.reconciled.remove(id);
            self.origin_states.remove(id);
        }

        self.seen_announcements.retain(|_, seen| !expired(seen));
        let live: HashSet<&TaskId> = self
            .seen_announcements
            .keys()
            .map(|(_, id, _)| id)
            .chain(self.executions.keys().map(|(_, id)| id))
            .collect();
        self.peer_states.retain(|id, _| live.contains(id));

        self.last_seen.retain(|_, seen| !expired(seen));
        self.scheduler.prune_completed();
        before.saturating_sub(self.record_count())
    }

    /// Coordination records currently kept beyond the task graph.
    pub(super) fn record_count(&self) -> usize {
        self.reconciled.len()
            + self.origin_states.len()
            + self.peer_states.len()
            + self.seen_announcements.len()
            + self.scheduler.completed_len()
    }

    /// Cancel every non-terminal descendant of `id`.
    ///
    /// Descendants can only be waiting in the scheduler since their dependency
    /// never completed.
    pub(super) fn cancel_descendants(&mut self, id: &TaskId) -> Vec<TaskId> {
        let reason = format!("dependency {id} did not complete");
        let mut cancelled = Vec::new();
        for desc in self.graph.descendants(id) {
            let terminal = self
                .graph
                .get(&desc)
                .is_none_or(|node| node.status.is_terminal());
            if terminal {
                continue;
            }
            if let Some(handle) = self.scheduler.handle_of(&desc) {
                let _ = self.scheduler.remove(handle);
            }
            if self
                .graph
                .set_status(&desc, TaskStatus::Cancelled, Some(reason.clone()))
                .is_ok()
            {
                cancelled.push(desc);
            }
        }
        cancelled
    }
}
