use std::str::FromStr;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::NoOpProgressTracker;

#[test]
fn defaults() {
    let event = Event::new("echo", json!({"payload": 1}));
    assert!(!event.event_id.is_empty());
    assert_eq!(event.event_type, "echo");
    assert_eq!(event.exec_mode, None);
    assert_eq!(event.priority, DEFAULT_PRIORITY);
    assert_eq!(event.timeout_secs, DEFAULT_TIMEOUT_SECS);
    assert_eq!(event.max_retries, DEFAULT_MAX_RETRIES);
    assert_eq!(event.progress_steps, 0);
    assert!(event.handler_locator.is_none());
}

#[test]
fn unique_ids() {
    let a = Event::new("echo", json!(null));
    let b = Event::new("echo", json!(null));
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn builder_setters() {
    let event = Event::new("compute", json!([1, 2, 3]))
        .with_exec_mode(ExecMode::Corelet)
        .with_timeout_secs(2)
        .with_max_retries(0)
        .with_priority(9);
    assert_eq!(event.exec_mode, Some(ExecMode::Corelet));
    assert_eq!(event.timeout_secs, 2);
    assert_eq!(event.max_retries, 0);
    assert_eq!(event.priority, 9);
}

#[test]
fn priority_clamped() {
    let event = Event::new("echo", json!(null)).with_priority(99);
    assert_eq!(event.priority, MAX_PRIORITY);
}

#[test]
fn validate_rejects_empty_type() {
    let event = Event::new("", json!(null));
    let err = event.validate().unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn validate_rejects_zero_timeout() {
    let event = Event::new("echo", json!(null)).with_timeout_secs(0);
    assert!(event.validate().is_err());
}

#[test]
fn validate_accepts_defaults() {
    assert!(Event::new("echo", json!(null)).validate().is_ok());
}

#[test]
fn exec_mode_strings_round_trip() {
    for mode in [
        ExecMode::Sync,
        ExecMode::Thread,
        ExecMode::Corelet,
        ExecMode::Cmd,
    ] {
        assert_eq!(ExecMode::from_str(mode.as_str()).unwrap(), mode);
    }
    assert!(ExecMode::from_str("warp").is_err());
}

#[test]
fn tracker_skipped_by_serde() {
    let event = Event::new("echo", json!("hi")).with_progress(Arc::new(NoOpProgressTracker), 3);
    let wire = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&wire).unwrap();
    assert!(parsed.progress_tracker.is_none());
    assert_eq!(parsed.progress_steps, 3);
    assert_eq!(parsed.event_id, event.event_id);
    assert_eq!(parsed.data, json!("hi"));
}

#[test]
fn locator_splits_type_name() {
    struct EchoHandler;
    let locator = HandlerLocator::of::<EchoHandler>("echo");
    assert_eq!(locator.handler_name, "EchoHandler");
    assert!(locator.module_path.contains("event"));
    assert_eq!(locator.event_type, "echo");
}
