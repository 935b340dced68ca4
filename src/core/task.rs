//! Task identity, status lifecycle and graph node data.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Globally unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque content identifier for payloads and results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    /// Wrap a content identifier.
    pub fn new(r: impl Into<String>) -> Self {
        Self(r.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Reference to the input of a task.
pub type PayloadRef = ContentRef;
/// Reference to the output of a task.
pub type ResultRef = ContentRef;

/// Where a task is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Runs on the submitting peer only.
    #[default]
    Local,
    /// Announced to every peer; the responsible peer runs it.
    Distributed,
}

/// Status of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies completed.
    Ready,
    /// Extracted from the scheduler.
    Dispatched,
    /// Announced and being executed by some peer.
    RemotelyExecuting,
    /// Executing on this peer.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or timed out.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Dispatched => 2,
            Self::RemotelyExecuting | Self::Running => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    /// Completed, Failed and Cancelled never change again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    ///
    /// Cancelled is reachable from any non-terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Cancelled {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Dispatched => "dispatched",
            Self::RemotelyExecuting => "remotely_executing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Submission data for a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Explicit id; generated when absent.
    pub id: Option<TaskId>,
    /// Reference to the task input.
    pub payload: PayloadRef,
    /// Priority key, smaller runs first.
    pub priority: u64,
    /// Tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl NewTask {
    /// Build a submission with a generated id and no dependencies.
    pub fn new(payload: impl Into<String>, priority: u64) -> Self {
        Self {
            id: None,
            payload: ContentRef::new(payload),
            priority,
            dependencies: Vec::new(),
        }
    }

    /// Set an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Task identifier.
    pub id: TaskId,
    /// Priority key, smaller runs first.
    pub priority: u64,
    /// Ids this task waits on.
    pub dependencies: BTreeSet<TaskId>,
    /// Local or distributed execution.
    pub kind: TaskKind,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Reference to the task input.
    pub payload: PayloadRef,
    /// Reference to the output once completed.
    pub result: Option<ResultRef>,
    /// Human-readable reason for Failed/Cancelled.
    pub failure_reason: Option<String>,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Last status change in milliseconds since epoch.
    pub updated_at_ms: u128,
}

impl TaskNode {
    /// Build a Pending node from a submission.
    pub fn from_submission(task: NewTask, kind: TaskKind) -> Self {
        let now = now_ms();
        Self {
            id: task.id.unwrap_or_else(TaskId::generate),
            priority: task.priority,
            dependencies: task.dependencies.into_iter().collect(),
            kind,
            status: TaskStatus::Pending,
            payload: task.payload,
            result: None,
            failure_reason: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}
