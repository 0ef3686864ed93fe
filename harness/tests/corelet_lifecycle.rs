//! Corelet lifecycle: session reuse, authoritative timeouts, external
//! death, idle auto-exit, and shutdown cleanup. These tests spawn the
//! real `corebus-worker` binary.

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use corebus_core::Event;
use corebus_core::EventBus;
use corebus_core::EventBusConfig;
use corebus_core::EventError;
use corebus_core::ExecMode;
use corebus_harness::ECHO_EVENT;
use corebus_harness::MONTE_CARLO_EVENT;
use corebus_harness::SLEEP_EVENT;
use corebus_harness::WORKER_ONLY_ECHO_EVENT;
use corebus_harness::register_demo_handlers;
use pretty_assertions::assert_eq;
use serde_json::json;

fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_corebus-worker"))
}

fn corelet_bus(overrides: impl FnOnce(&mut EventBusConfig)) -> EventBus {
    register_demo_handlers();
    let mut config = EventBusConfig {
        thread_pool_size: 2,
        process_pool_max: 2,
        health_interval_secs: 1,
        shutdown_grace_secs: 2,
        worker_program: Some(worker_program()),
        ..EventBusConfig::default()
    };
    overrides(&mut config);
    EventBus::new(config).unwrap()
}

fn corelet(event_type: &str, data: serde_json::Value) -> Event {
    Event::new(event_type, data).with_exec_mode(ExecMode::Corelet)
}

fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[test]
fn session_reuse_across_events() {
    let bus = corelet_bus(|_| {});

    for i in 0..5 {
        let id = bus
            .publish(corelet(ECHO_EVENT, json!({"index": i})))
            .unwrap();
        let results = bus.get_results(Some(&[id.clone()]), true);
        let result = &results[&id];
        assert!(result.success, "event {i} failed: {:?}", result.error);
        assert_eq!(result.data, Some(json!({"index": i})));
    }

    // Sequential events reuse the session instead of spawning per event.
    assert_eq!(bus.worker_process_count(), 1);
}

#[test]
fn corelet_timeout_destroys_and_replaces_worker() {
    let bus = corelet_bus(|config| config.process_pool_max = 1);

    let started = Instant::now();
    let event = corelet(SLEEP_EVENT, json!({"duration_ms": 5000}))
        .with_timeout_secs(1)
        .with_max_retries(0);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(!result.success);
    assert_eq!(result.error, Some(EventError::Timeout { timeout_secs: 1 }));
    // Authoritative: bounded by timeout + grace, not by the handler.
    assert!(started.elapsed() < Duration::from_secs(3));

    // The wedged worker was destroyed; a fresh one serves the next event.
    let id = bus.publish(corelet(ECHO_EVENT, json!("after"))).unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    assert!(results[&id].success);
}

#[test]
fn externally_killed_worker_surfaces_worker_died() {
    let bus = corelet_bus(|config| {
        config.process_pool_max = 1;
        config.thread_pool_size = 1;
    });

    let event = corelet(SLEEP_EVENT, json!({"duration_ms": 10_000})).with_timeout_secs(30);
    let event = event.with_max_retries(0);
    let id = bus.publish(event).unwrap();

    // Let the dispatch reach the worker, then kill it from outside.
    thread::sleep(Duration::from_millis(800));
    let pids = bus.worker_process_ids();
    assert_eq!(pids.len(), 1, "task should be running on one worker");
    let status = Command::new("kill")
        .arg("-9")
        .arg(pids[0].to_string())
        .status()
        .unwrap();
    assert!(status.success());

    let started = Instant::now();
    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind(), "worker_died");
    // The pipe EOF makes this prompt, well inside two health intervals.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn long_handler_survives_health_probing_with_alive_signals() {
    let bus = corelet_bus(|_| {});

    // Roughly a couple of seconds of sampling with a 1s ping cadence.
    let event =
        corelet(MONTE_CARLO_EVENT, json!({"samples": 40_000_000u64})).with_timeout_secs(60);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success, "error: {:?}", result.error);
    let pi = result.data.as_ref().unwrap()["pi"].as_f64().unwrap();
    assert!((pi - std::f64::consts::PI).abs() < 0.05, "estimate was {pi}");
}

#[test]
fn idle_worker_exits_on_its_own() {
    let bus = corelet_bus(|config| config.process_idle_timeout_secs = 1);

    let id = bus.publish(corelet(ECHO_EVENT, json!("warmup"))).unwrap();
    let results = bus.get_results(Some(&[id]), true);
    assert_eq!(results.len(), 1);
    assert_eq!(bus.worker_process_count(), 1);
    let pids = bus.worker_process_ids();

    // Idle window (1s) + announcement + a ping cycle to reap.
    thread::sleep(Duration::from_secs(4));
    assert_eq!(bus.worker_process_count(), 0);
    for pid in pids {
        assert!(!pid_alive(pid), "worker {pid} still running");
    }
}

#[test]
fn shutdown_terminates_all_workers() {
    let bus = corelet_bus(|_| {});

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(bus.publish(corelet(ECHO_EVENT, json!(i))).unwrap());
    }
    bus.join();
    let pids = bus.worker_process_ids();
    assert!(!pids.is_empty());

    bus.shutdown();
    assert_eq!(bus.worker_process_count(), 0);
    // Processes are gone, not merely forgotten.
    let deadline = Instant::now() + Duration::from_secs(5);
    for pid in pids {
        while pid_alive(pid) {
            assert!(Instant::now() < deadline, "worker {pid} outlived shutdown");
            thread::sleep(Duration::from_millis(50));
        }
    }
}

#[test]
fn corelet_without_parent_registration_resolves_in_worker() {
    // `worker_only_echo` is registered by the worker binary but never on
    // this side, so no locator can be attached; the worker resolves the
    // handler by event type on the first task.
    let bus = corelet_bus(|_| {});

    let id = bus
        .publish(corelet(WORKER_ONLY_ECHO_EVENT, json!("resolved-remotely")))
        .unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.data, Some(json!("resolved-remotely")));
}
