use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

#[test]
fn ok_sets_data_only() {
    let result = EventResult::ok("id-1", Some(json!(42)), 1);
    assert!(result.success);
    assert_eq!(result.data, Some(json!(42)));
    assert_eq!(result.error, None);
    assert_eq!(result.attempts, 1);
}

#[test]
fn ok_without_value() {
    let result = EventResult::ok("id-1", None, 2);
    assert!(result.success);
    assert!(result.data.is_none());
    assert!(result.error.is_none());
}

#[test]
fn failed_sets_error_only() {
    let result = EventResult::failed("id-2", EventError::Timeout { timeout_secs: 1 }, 4);
    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.error, Some(EventError::Timeout { timeout_secs: 1 }));
    assert_eq!(result.attempts, 4);
}

#[test]
fn retryable_classification() {
    assert!(EventError::execution("boom").is_retryable());
    assert!(EventError::Timeout { timeout_secs: 5 }.is_retryable());
    assert!(
        EventError::WorkerDied {
            worker_id: "w".into()
        }
        .is_retryable()
    );
    assert!(!EventError::no_handler("x").is_retryable());
    assert!(!EventError::validation("bad").is_retryable());
    assert!(!EventError::ShutdownInProgress.is_retryable());
}

#[test]
fn error_serde_tagging() {
    let err = EventError::no_handler("echo");
    let wire = serde_json::to_value(&err).unwrap();
    assert_eq!(wire["kind"], "no_handler");
    assert_eq!(wire["event_type"], "echo");
    let parsed: EventError = serde_json::from_value(wire).unwrap();
    assert_eq!(parsed, err);
}

#[test]
fn error_display() {
    let err = EventError::WorkerDied {
        worker_id: "worker-3".into(),
    };
    assert_eq!(err.to_string(), "worker process 'worker-3' died");
}

#[test]
fn result_round_trip() {
    let result = EventResult::failed("id-9", EventError::ShutdownInProgress, 1);
    let wire = serde_json::to_string(&result).unwrap();
    let parsed: EventResult = serde_json::from_str(&wire).unwrap();
    assert_eq!(parsed.event_id, "id-9");
    assert_eq!(parsed.error, Some(EventError::ShutdownInProgress));
}
