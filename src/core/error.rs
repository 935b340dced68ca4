//! Error types for scheduling and coordination.

use std::time::Duration;

use thiserror::Error;

use crate::core::task::TaskId;

/// Errors produced by scheduler, graph and coordinator components.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Malformed input: bad message, mismatched operand widths, invalid key update.
    #[error("validation error: {0}")]
    Validation(String),
    /// Unknown heap handle, task id or peer.
    #[error("not found: {0}")]
    NotFound(String),
    /// No completion arrived within the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The task graph contains a cycle through the named task.
    #[error("cycle detected at task {0}")]
    Cycle(TaskId),
    /// Completion for a task that was already reconciled.
    #[error("duplicate completion for task {0}")]
    DuplicateCompletion(TaskId),
    /// Illegal status transition.
    #[error("invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        /// Task being updated.
        task: TaskId,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
    /// Publish/subscribe failure in the transport layer.
    #[error("transport error: {0}")]
    Transport(String),
    /// Wire encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = std::result::Result<T, anyhow::Error>;
