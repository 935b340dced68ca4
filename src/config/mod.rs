//! Configuration models for coordinators, timeouts and membership.

pub mod coordinator;

pub use coordinator::CoordinatorConfig;
