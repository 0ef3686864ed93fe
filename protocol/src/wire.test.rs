use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::ExecMode;

#[test]
fn task_record_tags() {
    let record = TaskRecord::Register {
        locator: HandlerLocator {
            module_path: "app::handlers".into(),
            handler_name: "EchoHandler".into(),
            event_type: "echo".into(),
        },
    };
    let wire = serde_json::to_value(&record).unwrap();
    assert_eq!(wire["type"], "register");
    assert_eq!(wire["locator"]["event_type"], "echo");
}

#[test]
fn task_round_trips_event() {
    let event = Event::new("echo", json!({"n": 7})).with_exec_mode(ExecMode::Corelet);
    let record = TaskRecord::Task {
        event: event.clone(),
    };
    let wire = serde_json::to_vec(&record).unwrap();
    match serde_json::from_slice(&wire).unwrap() {
        TaskRecord::Task { event: parsed } => {
            assert_eq!(parsed.event_id, event.event_id);
            assert_eq!(parsed.data, json!({"n": 7}));
        }
        other => panic!("unexpected record: {other:?}"),
    }
}

#[test]
fn result_optional_fields_default() {
    let wire = json!({"type": "result", "event_id": "e1", "success": true});
    match serde_json::from_value(wire).unwrap() {
        TaskRecord::Result {
            event_id,
            success,
            data,
            error,
        } => {
            assert_eq!(event_id, "e1");
            assert!(success);
            assert!(data.is_none());
            assert!(error.is_none());
        }
        other => panic!("unexpected record: {other:?}"),
    }
}

#[test]
fn registration_ack_payload() {
    match TaskRecord::registration_ack("echo") {
        TaskRecord::Result {
            event_id,
            success,
            data,
            ..
        } => {
            assert_eq!(event_id, "echo");
            assert!(success);
            assert_eq!(data, Some(json!(REGISTRATION_ACK)));
        }
        other => panic!("unexpected record: {other:?}"),
    }
}

#[test]
fn health_record_tags() {
    let wire = serde_json::to_value(HealthRecord::Ping).unwrap();
    assert_eq!(wire["type"], "ping");

    let wire = serde_json::to_value(HealthRecord::Died {
        worker_id: "w1".into(),
    })
    .unwrap();
    assert_eq!(wire["type"], "died");
    assert_eq!(wire["worker_id"], "w1");
}

#[test]
fn pong_status_defaults_to_none() {
    let wire = json!({"type": "pong", "last_alive": "2026-01-01T00:00:00Z"});
    match serde_json::from_value(wire).unwrap() {
        HealthRecord::Pong { status, .. } => assert!(status.is_none()),
        other => panic!("unexpected record: {other:?}"),
    }
}
