//! Tests for the coordinator builder

use std::sync::Arc;

use async_trait::async_trait;
use peer_scheduler::builders::CoordinatorBuilder;
use peer_scheduler::config::CoordinatorConfig;
use peer_scheduler::core::{CoordinationError, ExecutionContext, PayloadRef, ResultRef, TaskExecutor};
use peer_scheduler::infra::InMemoryBus;

struct Echo;

#[async_trait]
impl TaskExecutor for Echo {
    async fn execute(&self, payload: &PayloadRef, _ctx: ExecutionContext) -> Result<ResultRef, String> {
        Ok(payload.clone())
    }
}

#[test]
fn test_build_with_all_parts() {
    let bus = InMemoryBus::new();
    let coordinator = CoordinatorBuilder::new(CoordinatorConfig::new("a").with_static_peers(["b"]))
        .transport(Arc::new(bus.transport("a")))
        .executor(Arc::new(Echo))
        .build()
        .unwrap();
    assert_eq!(coordinator.peer_id(), "a");
    assert_eq!(coordinator.known_peers(), vec!["b".to_string()]);
    assert!(!coordinator.is_running());
}

#[test]
fn test_build_requires_transport_and_executor() {
    let bus = InMemoryBus::new();
    let err = CoordinatorBuilder::new(CoordinatorConfig::new("a"))
        .executor(Arc::new(Echo))
        .build()
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config(msg) if msg.contains("transport")));

    let err = CoordinatorBuilder::new(CoordinatorConfig::new("a"))
        .transport(Arc::new(bus.transport("a")))
        .build()
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config(msg) if msg.contains("executor")));
}

#[test]
fn test_build_rejects_invalid_config() {
    let bus = InMemoryBus::new();
    let err = CoordinatorBuilder::new(CoordinatorConfig::new(""))
        .transport(Arc::new(bus.transport("a")))
        .executor(Arc::new(Echo))
        .build()
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config(_)));
}
