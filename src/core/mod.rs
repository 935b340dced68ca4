//! Scheduling, dependency tracking, causal ordering and coordination.

pub mod audit;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod graph;
pub mod message;
pub mod responsibility;
pub mod scheduler;
pub mod task;
pub mod transport;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use clock::{compare_states, compute_head, CausalClock, CausalOrder, ClockState};
pub use coordinator::{Coordinator, DistributionState, TaskStatusView};
pub use error::{AppResult, CoordinationError, Result};
pub use executor::{ExecutionContext, TaskExecutor};
pub use graph::TaskGraph;
pub use message::{
    topics, Announcement, CancellationNotice, CompletionRecord, CompletionStatus, Heartbeat,
    WireMessage,
};
pub use responsibility::{
    hamming_distance, IdHasher, NormalizedId, ResponsibilityAssigner, Sha256IdHasher,
    DEFAULT_NORMALIZATION_BITS,
};
pub use scheduler::{HeapHandle, PriorityScheduler, ScheduledEntry};
pub use task::{ContentRef, NewTask, PayloadRef, ResultRef, TaskId, TaskKind, TaskNode, TaskStatus};
pub use transport::{Subscription, Transport};
