//! Receiving side: responsibility evaluation, execution, cancellation notices
//! and heartbeats.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::state::{DistributionState, Execution};
use super::Inner;
use crate::core::audit::AuditAction;
use crate::core::error::Result;
use crate::core::executor::ExecutionContext;
use crate::core::message::{
    Announcement, CancellationNotice, CompletionRecord, CompletionStatus, Heartbeat, WireMessage,
};
use crate::core::task::{PayloadRef, TaskId};
use crate::util::clock::now_ms;

impl Inner {
    pub(super) fn handle_announcement(self: &Arc<Self>, bytes: &[u8]) {
        let ann = match Announcement::decode(bytes) {
            Ok(ann) => ann,
            Err(err) => {
                warn!(error = %err, "dropping malformed announcement");
                return;
            }
        };
        if let Some(remote) = &ann.announcer_clock_state {
            self.clock.lock().merge(remote);
        }

        let self_id = self.config.peer_id.as_str();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let now = Instant::now();
        let seen_key = (ann.announcer_id.clone(), ann.task_id.clone(), ann.attempt);
        if state.seen_announcements.contains_key(&seen_key) {
            debug!(task = %ann.task_id, attempt = ann.attempt, "duplicate announcement delivery");
            return;
        }
        state.seen_announcements.insert(seen_key, now);
        if ann.announcer_id != self_id {
            state.last_seen.insert(ann.announcer_id.clone(), now);
        }
        let exec_key = (ann.announcer_id.clone(), ann.task_id.clone());
        if state.executions.contains_key(&exec_key) {
            debug!(task = %ann.task_id, attempt = ann.attempt, "already executing task");
            return;
        }
        state
            .peer_states
            .insert(ann.task_id.clone(), DistributionState::Evaluating);

        let candidates: Vec<String> = state
            .membership(self_id, self.config.liveness_window())
            .into_iter()
            .filter(|peer| !ann.excluded_peers.contains(peer))
            .collect();
        let excluded_self = ann.excluded_peers.iter().any(|p| p == self_id);
        if excluded_self || !self.assigner.is_responsible(self_id, &ann.target_id, &candidates) {
            state
                .peer_states
                .insert(ann.task_id.clone(), DistributionState::NotResponsible);
            debug!(
                task = %ann.task_id,
                announcer = %ann.announcer_id,
                attempt = ann.attempt,
                "not responsible"
            );
            return;
        }

        state
            .peer_states
            .insert(ann.task_id.clone(), DistributionState::Executing);
        let handle = tokio::spawn(Arc::clone(self).execute_announced(
            ann.task_id.clone(),
            ann.payload_ref,
            ann.announcer_id.clone(),
            ann.attempt,
        ));
        state.executions.insert(
            exec_key,
            Execution {
                attempt: ann.attempt,
                handle: handle.abort_handle(),
            },
        );
        drop(guard);

        info!(
            task = %ann.task_id,
            announcer = %ann.announcer_id,
            attempt = ann.attempt,
            "responsible for task, executing"
        );
        self.audit(&ann.task_id, AuditAction::Execute, Some(ann.announcer_id));
    }

    async fn execute_announced(
        self: Arc<Self>,
        task_id: TaskId,
        payload: PayloadRef,
        announcer_id: String,
        attempt: u32,
    ) {
        let ctx = ExecutionContext {
            task_id: task_id.clone(),
            announcer_id: announcer_id.clone(),
            attempt,
        };
        let outcome = self.executor.execute(&payload, ctx).await;

        let (head, clock_state) = {
            let mut clock = self.clock.lock();
            clock.tick();
            (clock.head().to_string(), clock.state().clone())
        };
        let (status, result_ref, error) = match outcome {
            Ok(result) => (CompletionStatus::Completed, Some(result), None),
            Err(err) => (CompletionStatus::Failed, None, Some(err)),
        };
        let record = CompletionRecord {
            task_id: task_id.clone(),
            announcer_id: announcer_id.clone(),
            result_ref,
            executor_id: self.config.peer_id.clone(),
            executor_clock_head: head,
            executor_clock_state: Some(clock_state),
            status,
            error,
            attempt,
        };

        {
            let mut state = self.state.lock();
            state.executions.remove(&(announcer_id.clone(), task_id.clone()));
            let done = match status {
                CompletionStatus::Completed => DistributionState::Completed,
                CompletionStatus::Failed => DistributionState::Failed,
            };
            state.peer_states.insert(task_id.clone(), done);
        }
        info!(task = %task_id, announcer = %announcer_id, ?status, "execution finished, publishing completion");
        self.audit(&task_id, AuditAction::Complete, Some(announcer_id));

        if let Err(err) = self.publish(&record).await {
            error!(task = %task_id, error = %err, "completion publish failed");
        }
    }

    pub(super) fn handle_cancel_notice(self: &Arc<Self>, bytes: &[u8]) {
        let notice = match CancellationNotice::decode(bytes) {
            Ok(notice) => notice,
            Err(err) => {
                warn!(error = %err, "dropping malformed cancellation notice");
                return;
            }
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let key = (notice.announcer_id.clone(), notice.task_id.clone());
        let Some(exec) = state.executions.remove(&key) else {
            debug!(task = %notice.task_id, announcer = %notice.announcer_id, "no matching execution to cancel");
            return;
        };
        exec.handle.abort();
        state
            .peer_states
            .insert(notice.task_id.clone(), DistributionState::Cancelled);
        drop(guard);
        info!(
            task = %notice.task_id,
            announcer = %notice.announcer_id,
            attempt = exec.attempt,
            reason = %notice.reason,
            "execution abandoned"
        );
        self.audit(&notice.task_id, AuditAction::Cancel, Some(notice.reason));
    }

    pub(super) fn handle_heartbeat(self: &Arc<Self>, bytes: &[u8]) {
        let beat = match Heartbeat::decode(bytes) {
            Ok(beat) => beat,
            Err(err) => {
                warn!(error = %err, "dropping malformed heartbeat");
                return;
            }
        };
        if beat.peer_id == self.config.peer_id {
            return;
        }
        let fresh = self
            .state
            .lock()
            .last_seen
            .insert(beat.peer_id.clone(), Instant::now())
            .is_none();
        if fresh {
            info!(peer = %beat.peer_id, "peer joined membership view");
        } else {
            debug!(peer = %beat.peer_id, head = %beat.clock_head, "heartbeat");
        }
    }

    pub(super) async fn publish_heartbeat(&self) -> Result<()> {
        let beat = Heartbeat {
            peer_id: self.config.peer_id.clone(),
            clock_head: self.clock.lock().head().to_string(),
            timestamp_ms: now_ms(),
        };
        self.publish(&beat).await
    }
}
