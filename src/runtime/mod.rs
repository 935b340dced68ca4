//! Application-facing API surface over a coordinator.

pub mod api;

pub use api::{cancel_task, health, submit_task, task_status, Health, TaskStatusResponse, TaskSubmission};
