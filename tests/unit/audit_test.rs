//! Tests for audit sink

use peer_scheduler::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    sink.record(build_audit_event("task1", "peer-a", AuditAction::Announce, Some("peer-b".into())));
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, "task1");
    assert_eq!(events[0].peer, "peer-a");
    assert_eq!(events[0].action, AuditAction::Announce);
    assert_eq!(events[0].detail.as_deref(), Some("peer-b"));
    assert!(events[0].created_at_ms > 0);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", "a", AuditAction::Submit, None));
    sink.record(build_audit_event("task2", "a", AuditAction::Submit, None));
    sink.record(build_audit_event("task3", "a", AuditAction::Submit, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "task2"); // First one popped
    assert_eq!(events[1].task_id, "task3");
}

#[test]
fn test_clones_share_events() {
    let sink = InMemoryAuditSink::new(8);
    let clone = sink.clone();
    clone.record(build_audit_event("t", "a", AuditAction::Timeout, None));
    clone.record(build_audit_event("t", "a", AuditAction::Reannounce, None));
    clone.record(build_audit_event("u", "a", AuditAction::Timeout, None));

    assert_eq!(sink.matching("t", AuditAction::Timeout).len(), 1);
    assert_eq!(sink.events().len(), 3);
    assert_eq!(AuditAction::DuplicateDiscarded.to_string(), "duplicate_discarded");
}
