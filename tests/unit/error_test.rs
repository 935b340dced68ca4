//! Tests for error types

use std::time::Duration;

use peer_scheduler::core::{AppResult, CoordinationError, TaskId};

#[test]
fn test_error_display() {
    let err = CoordinationError::Validation("bad width".into());
    assert_eq!(err.to_string(), "validation error: bad width");

    let err = CoordinationError::Cycle(TaskId::from("t1"));
    assert_eq!(err.to_string(), "cycle detected at task t1");

    let err = CoordinationError::DuplicateCompletion(TaskId::from("t2"));
    assert_eq!(err.to_string(), "duplicate completion for task t2");

    let err = CoordinationError::Timeout(Duration::from_millis(2_000));
    assert_eq!(err.to_string(), "timed out after 2s");
}

#[test]
fn test_codec_error_from_serde() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: CoordinationError = parse.unwrap_err().into();
    assert!(matches!(err, CoordinationError::Codec(_)));
    assert!(err.to_string().starts_with("codec error"));
}

#[test]
fn test_app_result_wraps_coordination_error() {
    fn fails() -> AppResult<()> {
        Err(CoordinationError::NotFound("task x".into()))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "not found: task x");
    assert!(err.downcast_ref::<CoordinationError>().is_some());
}
