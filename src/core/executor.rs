//! Task execution trait.

use async_trait::async_trait;

use crate::core::task::{PayloadRef, ResultRef, TaskId};

/// Context handed to an executor alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// Peer that asked for the execution (self for local tasks).
    pub announcer_id: String,
    /// Announcement attempt, 0 for local tasks and first announcements.
    pub attempt: u32,
}

/// Abstraction for executing a payload and producing a result reference.
///
/// The coordinator only inspects the outcome: `Ok` becomes a Completed task,
/// `Err` a Failed one with the error text as the reason. Execution may take
/// arbitrarily long; timeouts are enforced by the originator.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use peer_scheduler::core::{ExecutionContext, PayloadRef, ResultRef, TaskExecutor};
///
/// struct Upper;
///
/// #[async_trait]
/// impl TaskExecutor for Upper {
///     async fn execute(&self, payload: &PayloadRef, _ctx: ExecutionContext) -> Result<ResultRef, String> {
///         Ok(ResultRef::new(payload.as_str().to_uppercase()))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute the payload.
    ///
    /// # Errors
    ///
    /// A human-readable description of why execution failed.
    async fn execute(&self, payload: &PayloadRef, ctx: ExecutionContext) -> Result<ResultRef, String>;
}
