use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::thread;
use std::time::Duration;

use corebus_protocol::ProgressTracker;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::handler::EventContext;
use crate::handlers::CmdOutcome;

struct EchoHandler;

impl EventHandler for EchoHandler {
    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        Ok(Some(event.data.clone()))
    }
}

#[derive(Default)]
struct SyncEchoHandler;

impl EventHandler for SyncEchoHandler {
    fn preferred_exec_mode(&self) -> ExecMode {
        ExecMode::Sync
    }

    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        Ok(Some(event.data.clone()))
    }
}

/// Fails the first `fails` attempts it sees, then succeeds.
struct FlakyHandler {
    fails: u32,
    seen: AtomicU32,
}

impl EventHandler for FlakyHandler {
    fn handle(
        &self,
        _event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        let attempt = self.seen.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if attempt <= self.fails {
            Err(EventError::execution(format!("attempt {attempt} failed")))
        } else {
            Ok(Some(json!(attempt)))
        }
    }
}

fn small_bus() -> EventBus {
    EventBus::new(EventBusConfig {
        thread_pool_size: 1,
        process_pool_max: 1,
        ..EventBusConfig::default()
    })
    .unwrap()
}

#[test]
fn sync_publish_stores_result_before_returning() {
    let bus = small_bus();
    bus.register_event_type_with::<EchoHandler, _>("bus_sync_echo", || EchoHandler);

    let event = Event::new("bus_sync_echo", json!("hi")).with_exec_mode(ExecMode::Sync);
    let id = bus.publish(event).unwrap();

    // No join needed: sync results are finalized inside publish.
    let results = bus.get_results(Some(&[id.clone()]), false);
    assert_eq!(results.len(), 1);
    let result = &results[&id];
    assert!(result.success);
    assert_eq!(result.data, Some(json!("hi")));
    assert_eq!(result.attempts, 1);

    // Retrieval removed the entry.
    assert!(bus.get_results(Some(&[id]), false).is_empty());
}

#[test]
fn thread_retry_then_success() {
    let bus = small_bus();
    bus.register_event_type_with::<FlakyHandler, _>("bus_flaky", || FlakyHandler {
        fails: 2,
        seen: AtomicU32::new(0),
    });

    let event = Event::new("bus_flaky", Value::Null)
        .with_exec_mode(ExecMode::Thread)
        .with_max_retries(3);
    let id = bus.publish(event).unwrap();

    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success);
    assert_eq!(result.attempts, 3);
}

#[test]
fn retries_exhaust_after_budget() {
    let bus = small_bus();
    bus.register_event_type_with::<FlakyHandler, _>("bus_always_fails", || FlakyHandler {
        fails: u32::MAX,
        seen: AtomicU32::new(0),
    });

    let event = Event::new("bus_always_fails", Value::Null)
        .with_exec_mode(ExecMode::Thread)
        .with_max_retries(3);
    let id = bus.publish(event).unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(!result.success);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.error.as_ref().unwrap().kind(), "execution");
}

#[test]
fn zero_retries_means_one_attempt() {
    let bus = small_bus();
    bus.register_event_type_with::<FlakyHandler, _>("bus_one_shot", || FlakyHandler {
        fails: u32::MAX,
        seen: AtomicU32::new(0),
    });

    let event = Event::new("bus_one_shot", Value::Null)
        .with_exec_mode(ExecMode::Thread)
        .with_max_retries(0);
    let id = bus.publish(event).unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    assert_eq!(results[&id].attempts, 1);
}

#[test]
fn priority_orders_queued_events() {
    let bus = small_bus();

    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
    struct GateHandler(crossbeam_channel::Receiver<()>);
    impl EventHandler for GateHandler {
        fn handle(
            &self,
            _event: &Event,
            _ctx: &mut EventContext<'_>,
        ) -> Result<Option<Value>, EventError> {
            let _ = self.0.recv_timeout(Duration::from_secs(5));
            Ok(None)
        }
    }

    let order = std::sync::Arc::new(Mutex::new(Vec::<String>::new()));
    struct RecorderHandler(std::sync::Arc<Mutex<Vec<String>>>);
    impl EventHandler for RecorderHandler {
        fn handle(
            &self,
            event: &Event,
            _ctx: &mut EventContext<'_>,
        ) -> Result<Option<Value>, EventError> {
            self.0
                .lock()
                .unwrap()
                .push(event.data.as_str().unwrap_or_default().to_string());
            Ok(None)
        }
    }

    bus.register_event_type_with::<GateHandler, _>("bus_gate", move || {
        GateHandler(gate_rx.clone())
    });
    let order_for_factory = std::sync::Arc::clone(&order);
    bus.register_event_type_with::<RecorderHandler, _>("bus_recorder", move || {
        RecorderHandler(std::sync::Arc::clone(&order_for_factory))
    });

    // Occupy the single worker so the next three stack up in the queue.
    bus.publish(
        Event::new("bus_gate", Value::Null)
            .with_exec_mode(ExecMode::Thread)
            .with_priority(10),
    )
    .unwrap();
    for (name, priority) in [("A", 1), ("B", 9), ("C", 5)] {
        bus.publish(
            Event::new("bus_recorder", json!(name))
                .with_exec_mode(ExecMode::Thread)
                .with_priority(priority),
        )
        .unwrap();
    }
    gate_tx.send(()).unwrap();
    bus.join();

    assert_eq!(*order.lock().unwrap(), vec!["B", "C", "A"]);
}

#[test]
fn missing_handler_fails_without_retry() {
    let bus = small_bus();
    let event = Event::new("bus_nobody_registered", Value::Null)
        .with_exec_mode(ExecMode::Thread)
        .with_max_retries(5);
    let id = bus.publish(event).unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error.as_ref().unwrap().kind(), "no_handler");
}

#[test]
fn publish_rejects_invalid_events() {
    let bus = small_bus();
    let err = bus.publish(Event::new("", Value::Null)).unwrap_err();
    assert_eq!(err.kind(), "validation");
    let err = bus
        .publish(Event::new("bus_zero_timeout", Value::Null).with_timeout_secs(0))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn cmd_mode_runs_shell_commands() {
    let bus = small_bus();
    let event = Event::new("bus_cmd", json!({"command": "printf from-cmd"}))
        .with_exec_mode(ExecMode::Cmd);
    let id = bus.publish(event).unwrap();
    let results = bus.get_results(Some(&[id.clone()]), true);
    let result = &results[&id];
    assert!(result.success);
    let outcome: CmdOutcome =
        serde_json::from_value(result.data.clone().unwrap()).unwrap();
    assert_eq!(outcome.stdout, "from-cmd");
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn preferred_mode_used_when_event_does_not_override() {
    let bus = small_bus();
    bus.register_event_type::<SyncEchoHandler>("bus_prefers_sync");

    let id = bus
        .publish(Event::new("bus_prefers_sync", json!("inline")))
        .unwrap();
    // The handler prefers sync, so the result exists without joining.
    let results = bus.get_results(Some(&[id.clone()]), false);
    assert_eq!(results[&id].data, Some(json!("inline")));
}

#[test]
fn bus_event_applies_configured_defaults() {
    let bus = EventBus::new(EventBusConfig {
        thread_pool_size: 1,
        default_timeout_secs: 7,
        default_max_retries: 1,
        ..EventBusConfig::default()
    })
    .unwrap();
    let event = bus.event("bus_defaults", Value::Null);
    assert_eq!(event.timeout_secs, 7);
    assert_eq!(event.max_retries, 1);
}

#[test]
fn get_results_without_ids_drains_everything() {
    let bus = small_bus();
    bus.register_event_type_with::<EchoHandler, _>("bus_drain_echo", || EchoHandler);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            bus.publish(
                Event::new("bus_drain_echo", json!(i)).with_exec_mode(ExecMode::Thread),
            )
            .unwrap(),
        );
    }
    let results = bus.get_results(None, true);
    assert_eq!(results.len(), 5);
    for id in ids {
        assert!(results.contains_key(&id));
    }
}

#[test]
fn join_blocks_until_queue_is_drained() {
    struct SlowHandler;
    impl EventHandler for SlowHandler {
        fn handle(
            &self,
            _event: &Event,
            _ctx: &mut EventContext<'_>,
        ) -> Result<Option<Value>, EventError> {
            thread::sleep(Duration::from_millis(100));
            Ok(None)
        }
    }

    let bus = small_bus();
    bus.register_event_type_with::<SlowHandler, _>("bus_slow", || SlowHandler);
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            bus.publish(Event::new("bus_slow", Value::Null).with_exec_mode(ExecMode::Thread))
                .unwrap(),
        );
    }
    bus.join();
    let results = bus.get_results(Some(&ids), false);
    assert_eq!(results.len(), 3);
}

#[test]
fn shutdown_drains_and_rejects_new_publishes() {
    let bus = small_bus();
    bus.register_event_type_with::<EchoHandler, _>("bus_shutdown_echo", || EchoHandler);

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            bus.publish(
                Event::new("bus_shutdown_echo", json!(i)).with_exec_mode(ExecMode::Thread),
            )
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

    let err = bus
        .publish(Event::new("bus_shutdown_echo", Value::Null))
        .unwrap_err();
    assert_eq!(err, EventError::ShutdownInProgress);
}

#[test]
fn shutdown_is_idempotent() {
    let bus = small_bus();
    bus.shutdown();
    bus.shutdown();
}

#[test]
fn progress_tracker_sees_full_lifecycle() {
    #[derive(Default)]
    struct CountingTracker {
        published: AtomicU32,
        started: AtomicU32,
        completed: AtomicU32,
        last_success: Mutex<Option<bool>>,
    }
    impl ProgressTracker for CountingTracker {
        fn on_published(&self, _event_id: &str, _event_type: &str) {
            self.published.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn on_started(&self, _event_id: &str, _event_type: &str) {
            self.started.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn on_completed(&self, _event_id: &str, _event_type: &str, success: bool, _steps: u64) {
            self.completed.fetch_add(1, AtomicOrdering::SeqCst);
            *self.last_success.lock().unwrap() = Some(success);
        }
    }

    let bus = small_bus();
    bus.register_event_type_with::<EchoHandler, _>("bus_tracked", || EchoHandler);

    let tracker = std::sync::Arc::new(CountingTracker::default());
    let event = Event::new("bus_tracked", json!("t"))
        .with_exec_mode(ExecMode::Sync)
        .with_progress(tracker.clone(), 2);
    bus.publish(event).unwrap();

    assert_eq!(tracker.published.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(tracker.started.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(tracker.completed.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(*tracker.last_success.lock().unwrap(), Some(true));
}

#[test]
fn registry_surface_is_exposed() {
    let bus = small_bus();
    bus.register_event_type_with::<EchoHandler, _>("bus_registry_probe", || EchoHandler);
    assert!(bus.is_registered("bus_registry_probe"));
    assert!(!bus.is_registered("bus_registry_ghost"));
    assert!(
        bus.registered_event_types()
            .contains(&"bus_registry_probe".to_string())
    );
}
