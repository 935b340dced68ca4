//! # Peer Scheduler
//!
//! Dependency-aware priority scheduling with coordination-free work distribution
//! across a set of peers.
//!
//! Each process runs one [`core::Coordinator`]. Locally submitted tasks are
//! ordered by a pairing-heap scheduler that only yields tasks whose dependencies
//! have completed. Distributable tasks are announced to every peer; each peer
//! independently decides whether it is responsible for the task by comparing the
//! Hamming distance between its normalized identifier and the task's. Exactly one
//! peer wins for any shared view of the peer set, so no negotiation messages are
//! needed. Completions flow back to the originator, which merges the executor's
//! causal clock and releases dependent work.
//!
//! ## Building blocks
//!
//! - **[`core::PriorityScheduler`]**: pairing heap with amortized O(1) insert and
//!   decrease-key, O(log n) extract-min, plus a pending set for gated tasks
//! - **[`core::TaskGraph`]**: arena DAG with BFS traversal and Kahn topological sort
//! - **[`core::CausalClock`]**: vector clock with a deterministic SHA-256 head
//! - **[`core::ResponsibilityAssigner`]**: Hamming-distance responsibility protocol
//! - **[`core::Coordinator`]**: announce → evaluate → execute → complete → reconcile
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peer_scheduler::builders::CoordinatorBuilder;
//! use peer_scheduler::config::CoordinatorConfig;
//! use peer_scheduler::core::{NewTask, TaskKind};
//! use peer_scheduler::infra::InMemoryBus;
//!
//! let bus = InMemoryBus::new();
//! let coordinator = CoordinatorBuilder::new(CoordinatorConfig::new("peer-a"))
//!     .transport(Arc::new(bus.transport("peer-a")))
//!     .executor(Arc::new(my_executor))
//!     .build()?;
//! coordinator.start().await?;
//!
//! let id = coordinator.submit(NewTask::new("blob:abc", 10), TaskKind::Distributed)?;
//! coordinator.dispatch_ready().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, graph, clock, responsibility and coordination logic.
pub mod core;
/// Configuration models for coordinators.
pub mod config;
/// Builders to construct coordinators from configuration.
pub mod builders;
/// Infrastructure adapters for message transports.
pub mod infra;
/// Application-facing API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
