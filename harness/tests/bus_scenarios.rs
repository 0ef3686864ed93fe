//! End-to-end scenarios through the public bus surface, using the demo
//! handlers only.

use std::time::Duration;
use std::time::Instant;

use corebus_core::Event;
use corebus_core::EventBus;
use corebus_core::EventBusConfig;
use corebus_core::EventError;
use corebus_core::ExecMode;
use corebus_harness::ECHO_EVENT;
use corebus_harness::FLAKY_EVENT;
use corebus_harness::SLEEP_EVENT;
use corebus_harness::register_demo_handlers;
use pretty_assertions::assert_eq;
use serde_json::json;

fn bus() -> EventBus {
    register_demo_handlers();
    EventBus::new(EventBusConfig {
        thread_pool_size: 2,
        process_pool_max: 1,
        ..EventBusConfig::default()
    })
    .unwrap()
}

#[test]
fn sync_echo_round_trip() {
    let bus = bus();
    let event = Event::new(ECHO_EVENT, json!("hi")).with_exec_mode(ExecMode::Sync);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    assert_eq!(results.len(), 1);
    let result = &results[&id];
    assert!(result.success);
    assert_eq!(result.data, Some(json!("hi")));
    assert_eq!(result.attempts, 1);

    // The store is not a log: the id is gone now.
    assert!(bus.get_results(Some(&[id]), true).is_empty());
}

#[test]
fn thread_flaky_retries_until_success() {
    let bus = bus();
    let event = Event::new(FLAKY_EVENT, json!({"fail_times": 2}))
        .with_exec_mode(ExecMode::Thread)
        .with_max_retries(3);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.attempts, 3);
}

#[test]
fn thread_timeout_is_cooperative() {
    let bus = bus();
    let started = Instant::now();
    let event = Event::new(SLEEP_EVENT, json!({"duration_ms": 1500}))
        .with_exec_mode(ExecMode::Thread)
        .with_timeout_secs(1)
        .with_max_retries(0);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(!result.success);
    assert_eq!(result.error, Some(EventError::Timeout { timeout_secs: 1 }));
    assert_eq!(result.attempts, 1);
    // Cooperative: observed when the handler returned, not before.
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[test]
fn cmd_event_runs_the_shell() {
    let bus = bus();
    let event = Event::new("list_tmp", json!({"command": "printf scenario-ok"}))
        .with_exec_mode(ExecMode::Cmd);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success);
    let data = result.data.as_ref().unwrap();
    assert_eq!(data["exit_code"], 0);
    assert_eq!(data["stdout"], "scenario-ok");
}

#[test]
fn mixed_batch_join_then_drain() {
    let bus = bus();
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            bus.publish(Event::new(ECHO_EVENT, json!(i)).with_exec_mode(ExecMode::Thread))
                .unwrap(),
        );
    }
    ids.push(
        bus.publish(Event::new(ECHO_EVENT, json!("inline")).with_exec_mode(ExecMode::Sync))
            .unwrap(),
    );

    bus.join();
    let results = bus.get_results(None, false);
    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.success));
}

#[test]
fn shutdown_then_publish_is_rejected() {
    let bus = bus();
    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            bus.publish(Event::new(ECHO_EVENT, json!(i)).with_exec_mode(ExecMode::Thread))
                .unwrap(),
        );
    }
    bus.shutdown();

    let results = bus.get_results(Some(&ids), false);
    assert_eq!(results.len(), 10);
    for result in results.values() {
        assert!(result.success || result.error == Some(EventError::ShutdownInProgress));
    }
    assert_eq!(bus.worker_process_count(), 0);

    let err = bus.publish(Event::new(ECHO_EVENT, json!(0))).unwrap_err();
    assert_eq!(err, EventError::ShutdownInProgress);
}
