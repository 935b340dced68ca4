//! Wire messages exchanged between peers.
//!
//! Messages are JSON documents published on fixed topics. Field order and the
//! sorted clock state make encoding deterministic, so decoding and re-encoding a
//! message yields the same bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::clock::ClockState;
use crate::core::error::{CoordinationError, Result};
use crate::core::responsibility::NormalizedId;
use crate::core::task::{PayloadRef, ResultRef, TaskId};

/// Topic names.
pub mod topics {
    /// Distributable task announcements.
    pub const TASK_ANNOUNCE: &str = "task-announce";
    /// Completion records from executing peers.
    pub const TASK_COMPLETE: &str = "task-complete";
    /// Best-effort cancellation notices.
    pub const TASK_CANCEL: &str = "task-cancel";
    /// Liveness heartbeats.
    pub const PEER_HEARTBEAT: &str = "peer-heartbeat";
}

/// A message with a fixed topic and JSON encoding.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Topic the message is published on.
    const TOPIC: &'static str;

    /// Structural checks beyond what deserialization enforces.
    ///
    /// # Errors
    ///
    /// `Validation` describing the first problem found.
    fn validate(&self) -> Result<()>;

    /// Encode to bytes.
    ///
    /// # Errors
    ///
    /// `Codec` if serialization fails.
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate.
    ///
    /// # Errors
    ///
    /// `Codec` for malformed JSON, `Validation` for structurally invalid content.
    fn decode(bytes: &[u8]) -> Result<Self> {
        let msg: Self = serde_json::from_slice(bytes)?;
        msg.validate()?;
        Ok(msg)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(CoordinationError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Broadcast asking the responsible peer to execute a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Task to execute.
    pub task_id: TaskId,
    /// Reference to the task input.
    pub payload_ref: PayloadRef,
    /// Originating peer.
    pub announcer_id: String,
    /// Head of the announcer's clock after its tick.
    pub announcer_clock_head: String,
    /// Full announcer clock state, if shipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcer_clock_state: Option<ClockState>,
    /// Normalized task id.
    pub target_id: NormalizedId,
    /// Announcement time in milliseconds since epoch.
    pub timestamp_ms: u128,
    /// 0 for the first announcement, incremented on each re-announcement.
    #[serde(default)]
    pub attempt: u32,
    /// Peers the announcer presumes unresponsive for this task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_peers: Vec<String>,
}

impl WireMessage for Announcement {
    const TOPIC: &'static str = topics::TASK_ANNOUNCE;

    fn validate(&self) -> Result<()> {
        require("task_id", self.task_id.as_str())?;
        require("announcer_id", &self.announcer_id)?;
        require("announcer_clock_head", &self.announcer_clock_head)?;
        if self.target_id.as_bytes().len() != self.target_id.bits().div_ceil(8) {
            return Err(CoordinationError::Validation(format!(
                "target_id has {} bytes for {} bits",
                self.target_id.as_bytes().len(),
                self.target_id.bits()
            )));
        }
        Ok(())
    }
}

/// Outcome reported by the executing peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Executor returned a result.
    Completed,
    /// Executor returned an error.
    Failed,
}

/// Broadcast by the executing peer when a task finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Task that finished.
    pub task_id: TaskId,
    /// Originator whose announcement this record answers.
    pub announcer_id: String,
    /// Reference to the output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
    /// Peer that executed the task.
    pub executor_id: String,
    /// Head of the executor's clock after its tick.
    pub executor_clock_head: String,
    /// Full executor clock state, if shipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_clock_state: Option<ClockState>,
    /// Outcome.
    pub status: CompletionStatus,
    /// Executor error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Announcement attempt this record answers.
    #[serde(default)]
    pub attempt: u32,
}

impl WireMessage for CompletionRecord {
    const TOPIC: &'static str = topics::TASK_COMPLETE;

    fn validate(&self) -> Result<()> {
        require("task_id", self.task_id.as_str())?;
        require("announcer_id", &self.announcer_id)?;
        require("executor_id", &self.executor_id)?;
        require("executor_clock_head", &self.executor_clock_head)?;
        if self.status == CompletionStatus::Completed && self.error.is_some() {
            return Err(CoordinationError::Validation(
                "completed record must not carry an error".into(),
            ));
        }
        Ok(())
    }
}

/// Best-effort request to abandon a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationNotice {
    /// Task to abandon.
    pub task_id: TaskId,
    /// Originating peer.
    pub announcer_id: String,
    /// Why the task was cancelled.
    pub reason: String,
}

impl WireMessage for CancellationNotice {
    const TOPIC: &'static str = topics::TASK_CANCEL;

    fn validate(&self) -> Result<()> {
        require("task_id", self.task_id.as_str())?;
        require("announcer_id", &self.announcer_id)
    }
}

/// Periodic liveness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sending peer.
    pub peer_id: String,
    /// Sender's clock head.
    pub clock_head: String,
    /// Send time in milliseconds since epoch.
    pub timestamp_ms: u128,
}

impl WireMessage for Heartbeat {
    const TOPIC: &'static str = topics::PEER_HEARTBEAT;

    fn validate(&self) -> Result<()> {
        require("peer_id", &self.peer_id)
    }
}
