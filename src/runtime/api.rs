//! API-facing request/response models.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{
    AppResult, Coordinator, DistributionState, NewTask, PayloadRef, ResultRef, TaskId, TaskKind,
    TaskStatus,
};

/// Task submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Explicit task identifier; generated when absent.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    /// Reference to the task input.
    pub payload_ref: PayloadRef,
    /// Priority key, smaller runs first.
    pub priority: u64,
    /// Tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Where the task runs.
    #[serde(default)]
    pub kind: TaskKind,
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Optional reason for failure/cancellation.
    pub reason: Option<String>,
    /// Output reference once completed.
    pub result_ref: Option<ResultRef>,
    /// Coordination state for distributed tasks.
    pub distribution: Option<DistributionState>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Reporting peer.
    pub peer_id: String,
    /// Peers in the membership view.
    pub known_peers: usize,
    /// Tasks ready to dispatch.
    pub ready: usize,
    /// Tasks waiting on dependencies.
    pub pending: usize,
}

/// Submit a task and report its initial status.
pub fn submit_task(coordinator: &Coordinator, req: TaskSubmission) -> AppResult<TaskStatusResponse> {
    let mut task = NewTask::new(req.payload_ref.as_str(), req.priority);
    task.id = req.task_id;
    task.dependencies = req.dependencies;
    let id = coordinator
        .submit(task, req.kind)
        .context("task submission rejected")?;
    task_status(coordinator, &id)
}

/// Look up a task's status.
pub fn task_status(coordinator: &Coordinator, task_id: &TaskId) -> AppResult<TaskStatusResponse> {
    let view = coordinator
        .status(task_id)
        .with_context(|| format!("unknown task {task_id}"))?;
    Ok(TaskStatusResponse {
        task_id: view.task_id,
        status: view.status,
        reason: view.reason,
        result_ref: view.result_ref,
        distribution: view.distribution,
    })
}

/// Cancel a task and report its final status.
pub async fn cancel_task(coordinator: &Coordinator, task_id: &TaskId) -> AppResult<TaskStatusResponse> {
    coordinator
        .cancel(task_id)
        .await
        .with_context(|| format!("cancelling task {task_id}"))?;
    task_status(coordinator, task_id)
}

/// Return a health payload.
pub fn health(coordinator: &Coordinator) -> Health {
    let (ready, pending) = coordinator.queue_depth();
    Health {
        ok: coordinator.is_running(),
        peer_id: coordinator.peer_id().to_string(),
        known_peers: coordinator.known_peers().len(),
        ready,
        pending,
    }
}
