//! Tests for the application-facing API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peer_scheduler::builders::CoordinatorBuilder;
use peer_scheduler::config::CoordinatorConfig;
use peer_scheduler::core::{
    Coordinator, ExecutionContext, PayloadRef, ResultRef, TaskExecutor, TaskId, TaskKind, TaskStatus,
};
use peer_scheduler::infra::InMemoryBus;
use peer_scheduler::runtime::{cancel_task, health, submit_task, task_status, TaskSubmission};

struct Echo;

#[async_trait]
impl TaskExecutor for Echo {
    async fn execute(&self, payload: &PayloadRef, _ctx: ExecutionContext) -> Result<ResultRef, String> {
        Ok(payload.clone())
    }
}

fn coordinator(bus: &InMemoryBus) -> Coordinator {
    CoordinatorBuilder::new(CoordinatorConfig::new("api"))
        .transport(Arc::new(bus.transport("api")))
        .executor(Arc::new(Echo))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_submit_and_query() {
    let bus = InMemoryBus::new();
    let c = coordinator(&bus);
    c.start().await.unwrap();

    let req: TaskSubmission =
        serde_json::from_str(r#"{"task_id": "job-1", "payload_ref": "blob:1", "priority": 4}"#).unwrap();
    assert_eq!(req.kind, TaskKind::Local);
    let resp = submit_task(&c, req).unwrap();
    assert_eq!(resp.task_id, TaskId::from("job-1"));
    assert_eq!(resp.status, TaskStatus::Ready);

    c.dispatch_ready().await.unwrap();
    c.wait_for(&resp.task_id, Duration::from_secs(5)).await.unwrap();
    let resp = task_status(&c, &resp.task_id).unwrap();
    assert_eq!(resp.status, TaskStatus::Completed);
    assert_eq!(resp.result_ref, Some(ResultRef::from("blob:1")));

    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["status"], "completed");
}

#[tokio::test]
async fn test_errors_carry_context() {
    let bus = InMemoryBus::new();
    let c = coordinator(&bus);

    let err = task_status(&c, &TaskId::from("ghost")).unwrap_err();
    assert_eq!(err.to_string(), "unknown task ghost");

    let req = TaskSubmission {
        task_id: None,
        payload_ref: PayloadRef::from("p"),
        priority: 1,
        dependencies: vec![TaskId::from("missing")],
        kind: TaskKind::Local,
    };
    let err = submit_task(&c, req).unwrap_err();
    assert_eq!(err.to_string(), "task submission rejected");
    assert!(format!("{err:#}").contains("dependency missing"));
}

#[tokio::test]
async fn test_cancel_and_health() {
    let bus = InMemoryBus::new();
    let c = coordinator(&bus);
    assert!(!health(&c).ok);
    c.start().await.unwrap();

    let req = TaskSubmission {
        task_id: Some(TaskId::from("x")),
        payload_ref: PayloadRef::from("p"),
        priority: 1,
        dependencies: vec![],
        kind: TaskKind::Local,
    };
    submit_task(&c, req).unwrap();
    let h = health(&c);
    assert!(h.ok);
    assert_eq!(h.peer_id, "api");
    assert_eq!((h.ready, h.pending), (1, 0));

    let resp = cancel_task(&c, &TaskId::from("x")).await.unwrap();
    assert_eq!(resp.status, TaskStatus::Cancelled);
    assert_eq!(health(&c).ready, 0);
}
