//! Originator side: submission, dispatch, announcement, timeouts and
//! reconciliation of completions.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::state::{CoordinatorState, DistributionState, Outstanding};
use super::Inner;
use crate::core::audit::AuditAction;
use crate::core::error::{CoordinationError, Result};
use crate::core::executor::ExecutionContext;
use crate::core::message::{
    Announcement, CancellationNotice, CompletionRecord, CompletionStatus, WireMessage,
};
use crate::core::task::{NewTask, PayloadRef, ResultRef, TaskId, TaskKind, TaskStatus};
use crate::util::clock::now_ms;

/// Outcome of an execution: the result reference, or the failure reason.
type Outcome = std::result::Result<Option<ResultRef>, String>;

impl Inner {
    pub(super) fn submit(&self, task: NewTask, kind: TaskKind) -> Result<TaskId> {
        if task.payload.as_str().is_empty() {
            return Err(CoordinationError::Validation("payload reference must not be empty".into()));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(id) = task.id.as_ref().filter(|id| state.graph.contains(id)) {
            return Err(CoordinationError::Validation(format!("task {id} already submitted")));
        }
        if let Some(dep) = task.dependencies.iter().find(|dep| !state.graph.contains(dep)) {
            return Err(CoordinationError::NotFound(format!("dependency {dep}")));
        }

        let deps = task.dependencies.clone();
        let node = state.graph.add_node(task, kind).clone();
        let id = node.id.clone();
        for dep in &deps {
            state.graph.add_child(dep, &id);
        }

        let dead = deps.iter().find(|dep| {
            state
                .graph
                .get(dep)
                .is_some_and(|n| matches!(n.status, TaskStatus::Failed | TaskStatus::Cancelled))
        });
        if let Some(dead) = dead {
            let reason = format!("dependency {dead} did not complete");
            state.graph.set_status(&id, TaskStatus::Cancelled, Some(reason.clone()))?;
            drop(guard);
            info!(task = %id, %reason, "task cancelled on submission");
            self.audit(&id, AuditAction::Cancel, Some(reason));
            self.settled.notify_waiters();
            return Ok(id);
        }

        // the scheduler may have forgotten dependencies that finished long ago
        for dep in &deps {
            if state.graph.get(dep).is_some_and(|n| n.status == TaskStatus::Completed) {
                state.scheduler.mark_completed(dep);
            }
        }
        state.scheduler.insert(&node, node.priority);
        let ready = deps.iter().all(|dep| state.scheduler.is_completed(dep));
        if ready {
            state.graph.set_status(&id, TaskStatus::Ready, None)?;
        }
        drop(guard);

        info!(task = %id, ?kind, priority = node.priority, ready, "task submitted");
        self.audit(&id, AuditAction::Submit, Some(kind_label(kind).into()));
        Ok(id)
    }

    pub(super) async fn dispatch_ready(self: &Arc<Self>) -> Result<usize> {
        if !self.started.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoordinationError::Validation("coordinator has not been started".into()));
        }

        let mut dispatched = 0;
        let announcements = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut announcements = Vec::new();

            while let Some(entry) = state.scheduler.extract_min() {
                let Some(node) = state.graph.get(&entry.task_id) else {
                    continue;
                };
                if node.status.is_terminal() {
                    continue;
                }
                let (kind, payload) = (node.kind, node.payload.clone());
                let id = entry.task_id;
                if let Err(err) = state.graph.set_status(&id, TaskStatus::Dispatched, None) {
                    warn!(task = %id, error = %err, "skipping task that cannot be dispatched");
                    continue;
                }

                match kind {
                    TaskKind::Local => {
                        state.graph.set_status(&id, TaskStatus::Running, None)?;
                        let handle = tokio::spawn(Arc::clone(self).run_local(id.clone(), payload));
                        state.local_runs.insert(id, handle.abort_handle());
                    }
                    TaskKind::Distributed => {
                        state.graph.set_status(&id, TaskStatus::RemotelyExecuting, None)?;
                        state.origin_states.insert(id.clone(), DistributionState::Idle);
                        state.outstanding.insert(id.clone(), Outstanding::new(payload));
                        announcements.push(id);
                    }
                }
                dispatched += 1;
            }
            announcements
        };

        for id in announcements {
            if let Err(err) = self.announce(&id).await {
                // The timer is armed before publishing, so a failed publish is
                // retried through the timeout path.
                error!(task = %id, error = %err, "announcement failed");
            }
        }
        Ok(dispatched)
    }

    /// Publish the current attempt of an outstanding task and arm its timer.
    pub(super) async fn announce(self: &Arc<Self>, task_id: &TaskId) -> Result<()> {
        let target = self.assigner.normalize(task_id.as_str());
        let self_id = self.config.peer_id.as_str();

        let (payload, attempt, excluded, presumed) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let members = state.membership(self_id, self.config.liveness_window());
            let Some(entry) = state.outstanding.get_mut(task_id) else {
                debug!(task = %task_id, "task no longer outstanding, not announcing");
                return Ok(());
            };
            let excluded = entry.excluded.clone();
            let candidates = std::iter::once(self_id)
                .chain(members.iter().map(String::as_str))
                .filter(|peer| !excluded.iter().any(|e| e.as_str() == *peer));
            let presumed = self.assigner.responsible_peer(&target, candidates)?.map(String::from);
            entry.presumed.clone_from(&presumed);
            let snapshot = (entry.payload.clone(), entry.attempt, excluded, presumed);
            state.origin_states.insert(task_id.clone(), DistributionState::Announced);
            snapshot
        };

        let (head, clock_state) = {
            let mut clock = self.clock.lock();
            clock.tick();
            (clock.head().to_string(), clock.state().clone())
        };

        let announcement = Announcement {
            task_id: task_id.clone(),
            payload_ref: payload,
            announcer_id: self.config.peer_id.clone(),
            announcer_clock_head: head,
            announcer_clock_state: Some(clock_state),
            target_id: target,
            timestamp_ms: now_ms(),
            attempt,
            excluded_peers: excluded,
        };
        self.arm_timer(task_id, attempt);

        let action = if attempt == 0 { AuditAction::Announce } else { AuditAction::Reannounce };
        self.audit(task_id, action, presumed.clone());
        info!(task = %task_id, attempt, presumed = ?presumed, "announcing task");

        self.publish(&announcement).await
    }

    fn arm_timer(self: &Arc<Self>, task_id: &TaskId, attempt: u32) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.task_timeout();
        let id = task_id.clone();

        let mut state = self.state.lock();
        let Some(entry) = state.outstanding.get_mut(task_id) else {
            return;
        };
        entry.disarm();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timeout(&id, attempt);
            }
        });
        entry.timer = Some(handle.abort_handle());
    }

    fn on_timeout(self: &Arc<Self>, task_id: &TaskId, attempt: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.outstanding.get_mut(task_id) else {
            return;
        };
        if entry.attempt != attempt {
            return;
        }
        entry.timer = None;
        state.origin_states.insert(task_id.clone(), DistributionState::TimedOut);
        warn!(
            task = %task_id,
            attempt,
            presumed = ?entry.presumed,
            timeout_ms = self.config.task_timeout_ms,
            "no completion before deadline"
        );

        if attempt < self.config.max_reannounce_attempts {
            let next = attempt + 1;
            if let Some(peer) = entry.presumed.take() {
                if !entry.excluded.contains(&peer) {
                    entry.excluded.push(peer);
                }
            }
            entry.attempt = next;
            let backoff = self.config.reannounce_backoff(next);
            let weak = Arc::downgrade(self);
            let id = task_id.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                let Some(inner) = weak.upgrade() else { return };
                if !inner.release_backoff(&id, next) {
                    return;
                }
                if let Err(err) = inner.announce(&id).await {
                    error!(task = %id, error = %err, "re-announcement failed");
                }
            });
            entry.timer = Some(handle.abort_handle());
            drop(guard);
            debug!(task = %task_id, next, ?backoff, "re-announcement scheduled");
            self.audit(task_id, AuditAction::Timeout, Some(format!("attempt {attempt}")));
            return;
        }

        state.outstanding.remove(task_id);
        state.reconciled.insert(task_id.clone(), Instant::now());
        if let Err(err) = state.graph.set_status(task_id, TaskStatus::Failed, Some("timeout".into())) {
            warn!(task = %task_id, error = %err, "cannot fail timed out task");
        }
        let cancelled = state.cancel_descendants(task_id);
        drop(guard);

        let err = CoordinationError::Timeout(self.config.task_timeout());
        warn!(task = %task_id, error = %err, cascaded = cancelled.len(), "task failed after final attempt");
        self.audit(task_id, AuditAction::Timeout, Some("final".into()));
        self.settled.notify_waiters();
    }

    /// Detach a due re-announcement from its outstanding entry so arming the
    /// next timer does not abort the task that is about to publish.
    ///
    /// Returns false when the task settled or moved on during the backoff.
    fn release_backoff(&self, task_id: &TaskId, attempt: u32) -> bool {
        let mut state = self.state.lock();
        match state.outstanding.get_mut(task_id) {
            Some(entry) if entry.attempt == attempt => {
                entry.timer = None;
                true
            }
            _ => false,
        }
    }

    pub(super) fn handle_completion(self: &Arc<Self>, bytes: &[u8]) {
        let record = match CompletionRecord::decode(bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "dropping malformed completion record");
                return;
            }
        };
        let task_id = record.task_id.clone();
        if record.announcer_id != self.config.peer_id {
            debug!(task = %task_id, announcer = %record.announcer_id, "completion answers another originator");
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.reconciled.contains_key(&task_id) {
            drop(guard);
            let err = CoordinationError::DuplicateCompletion(task_id.clone());
            debug!(executor = %record.executor_id, error = %err, "discarding completion");
            self.audit(&task_id, AuditAction::DuplicateDiscarded, Some(record.executor_id));
            return;
        }
        let Some(announced) = state.outstanding.get(&task_id).map(|entry| entry.attempt) else {
            return;
        };
        if record.attempt > announced {
            warn!(
                task = %task_id,
                executor = %record.executor_id,
                attempt = record.attempt,
                announced,
                "completion for an attempt never announced"
            );
            return;
        }
        let Some(mut entry) = state.outstanding.remove(&task_id) else {
            return;
        };
        entry.disarm();

        if let Some(remote) = &record.executor_clock_state {
            self.clock.lock().merge(remote);
        }

        let outcome: Outcome = match record.status {
            CompletionStatus::Completed => Ok(record.result_ref.clone()),
            CompletionStatus::Failed => Err(format!(
                "remote execution error: {}",
                record.error.as_deref().unwrap_or("unknown")
            )),
        };
        self.settle(state, &task_id, outcome);
        state.reconciled.insert(task_id.clone(), Instant::now());
        state.origin_states.insert(task_id.clone(), DistributionState::Reconciled);
        drop(guard);

        info!(
            task = %task_id,
            executor = %record.executor_id,
            status = ?record.status,
            attempt = record.attempt,
            "completion reconciled"
        );
        self.audit(&task_id, AuditAction::Reconcile, Some(record.executor_id));
        self.settled.notify_waiters();
    }

    pub(super) async fn run_local(self: Arc<Self>, task_id: TaskId, payload: PayloadRef) {
        let ctx = ExecutionContext {
            task_id: task_id.clone(),
            announcer_id: self.config.peer_id.clone(),
            attempt: 0,
        };
        self.audit(&task_id, AuditAction::Execute, None);
        let outcome: Outcome = self
            .executor
            .execute(&payload, ctx)
            .await
            .map(Some)
            .map_err(|e| format!("local execution error: {e}"));

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.local_runs.remove(&task_id);
            self.settle(state, &task_id, outcome);
        }
        self.audit(&task_id, AuditAction::Complete, None);
        self.settled.notify_waiters();
    }

    /// Apply an execution outcome to the graph and scheduler.
    fn settle(&self, state: &mut CoordinatorState, task_id: &TaskId, outcome: Outcome) {
        match outcome {
            Ok(result) => {
                if let Some(node) = state.graph.get_mut(task_id) {
                    if !node.status.is_terminal() {
                        node.result = result;
                    }
                }
                if let Err(err) = state.graph.set_status(task_id, TaskStatus::Completed, None) {
                    warn!(task = %task_id, error = %err, "cannot complete task");
                    return;
                }
                state.scheduler.mark_completed(task_id);
                let released = state.scheduler.reschedule_pending();
                state.promote_children(task_id);
                info!(task = %task_id, released, "task completed");
                if released > 0 {
                    self.released.notify_one();
                }
            }
            Err(reason) => {
                if let Err(err) =
                    state
                        .graph
                        .set_status(task_id, TaskStatus::Failed, Some(reason.clone()))
                {
                    warn!(task = %task_id, error = %err, "cannot fail task");
                    return;
                }
                let cancelled = state.cancel_descendants(task_id);
                warn!(task = %task_id, %reason, cascaded = cancelled.len(), "task failed");
            }
        }
    }

    pub(super) async fn cancel(self: &Arc<Self>, task_id: &TaskId) -> Result<()> {
        let notify_peers = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let status = state
                .graph
                .get(task_id)
                .map(|node| node.status)
                .ok_or_else(|| CoordinationError::NotFound(format!("task {task_id}")))?;
            if status.is_terminal() {
                return Err(CoordinationError::Validation(format!(
                    "task {task_id} is already {status}"
                )));
            }

            let mut notify_peers = false;
            if let Some(handle) = state.scheduler.handle_of(task_id) {
                state.scheduler.remove(handle)?;
            } else if let Some(mut entry) = state.outstanding.remove(task_id) {
                entry.disarm();
                state.reconciled.insert(task_id.clone(), Instant::now());
                state.origin_states.insert(task_id.clone(), DistributionState::Cancelled);
                notify_peers = true;
            } else if let Some(run) = state.local_runs.remove(task_id) {
                run.abort();
            }

            state
                .graph
                .set_status(task_id, TaskStatus::Cancelled, Some("cancelled".into()))?;
            let cascaded = state.cancel_descendants(task_id);
            info!(task = %task_id, dispatched = notify_peers, cascaded = cascaded.len(), "task cancelled");
            notify_peers
        };
        self.audit(task_id, AuditAction::Cancel, None);
        self.settled.notify_waiters();

        if notify_peers {
            let notice = CancellationNotice {
                task_id: task_id.clone(),
                announcer_id: self.config.peer_id.clone(),
                reason: "cancelled".into(),
            };
            self.publish(&notice).await?;
        }
        Ok(())
    }
}

const fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Local => "local",
        TaskKind::Distributed => "distributed",
    }
}
