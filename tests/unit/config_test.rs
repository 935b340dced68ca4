//! Tests for configuration loading and validation

use std::collections::HashMap;
use std::time::Duration;

use peer_scheduler::config::CoordinatorConfig;

#[test]
fn test_defaults() {
    let cfg = CoordinatorConfig::new("peer-a");
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.normalization_bits, 160);
    assert_eq!(cfg.task_timeout(), Duration::from_millis(2_000));
    assert_eq!(cfg.max_reannounce_attempts, 2);
    assert_eq!(cfg.liveness_window(), Duration::from_millis(3_000));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = CoordinatorConfig::from_json_str(
        r#"{"peer_id": "peer-a", "task_timeout_ms": 500, "static_peers": ["b", "c"]}"#,
    )
    .unwrap();
    assert_eq!(cfg.peer_id, "peer-a");
    assert_eq!(cfg.task_timeout_ms, 500);
    assert_eq!(cfg.static_peers, vec!["b", "c"]);
    assert_eq!(cfg.heartbeat_interval_ms, 1_000);
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(CoordinatorConfig::from_json_str("{").unwrap_err().starts_with("parse error"));
    let err = CoordinatorConfig::from_json_str(r#"{"peer_id": "a", "normalization_bits": 0}"#).unwrap_err();
    assert!(err.contains("normalization_bits"));
}

#[test]
fn test_validation_messages() {
    let mut cfg = CoordinatorConfig::new("a");
    cfg.task_timeout_ms = 0;
    assert!(cfg.validate().unwrap_err().contains("task_timeout_ms"));

    let cfg = CoordinatorConfig::new("a").with_static_peers(["b", " "]);
    assert!(cfg.validate().is_err());

    assert!(CoordinatorConfig::new("  ").validate().is_err());
}

#[test]
fn test_backoff_doubles_per_attempt() {
    let mut cfg = CoordinatorConfig::new("a");
    cfg.reannounce_backoff_ms = 100;
    assert_eq!(cfg.reannounce_backoff(1), Duration::from_millis(100));
    assert_eq!(cfg.reannounce_backoff(2), Duration::from_millis(200));
    assert_eq!(cfg.reannounce_backoff(3), Duration::from_millis(400));
}

#[test]
fn test_failure_deadline_covers_every_attempt() {
    // 2000 + (250 + 2000) + (500 + 2000)
    let cfg = CoordinatorConfig::new("a");
    assert_eq!(cfg.failure_deadline(), Duration::from_millis(6_750));

    let cfg = CoordinatorConfig::new("a").with_max_reannounce_attempts(0);
    assert_eq!(cfg.failure_deadline(), cfg.task_timeout());
}

#[test]
fn test_retention_must_cover_liveness_window() {
    let cfg = CoordinatorConfig::new("a");
    assert_eq!(cfg.retention(), Duration::from_secs(60));

    let cfg = CoordinatorConfig::new("a").with_retention_ms(2_999);
    assert!(cfg.validate().unwrap_err().contains("retention_ms"));
    assert!(CoordinatorConfig::new("a").with_retention_ms(3_000).validate().is_ok());
}

#[test]
fn test_from_lookup_reads_prefixed_variables() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("PEER_SCHED_PEER_ID", "peer-a"),
        ("PEER_SCHED_TASK_TIMEOUT_MS", "750"),
        ("PEER_SCHED_MAX_REANNOUNCE_ATTEMPTS", "0"),
        ("PEER_SCHED_STATIC_PEERS", "b, c,,d"),
        ("PEER_SCHED_RETENTION_MS", "5000"),
    ]);
    let cfg = CoordinatorConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
    assert_eq!(cfg.peer_id, "peer-a");
    assert_eq!(cfg.task_timeout_ms, 750);
    assert_eq!(cfg.max_reannounce_attempts, 0);
    assert_eq!(cfg.static_peers, vec!["b", "c", "d"]);
    assert_eq!(cfg.retention_ms, 5_000);
    assert_eq!(cfg.normalization_bits, 160);
}

#[test]
fn test_from_lookup_errors() {
    let err = CoordinatorConfig::from_lookup(|_| None).unwrap_err();
    assert!(err.contains("PEER_SCHED_PEER_ID"));

    let vars: HashMap<&str, &str> =
        HashMap::from([("PEER_SCHED_PEER_ID", "a"), ("PEER_SCHED_NORMALIZATION_BITS", "wide")]);
    let err = CoordinatorConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap_err();
    assert!(err.contains("PEER_SCHED_NORMALIZATION_BITS=wide"));
}
