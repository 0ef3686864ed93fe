use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::thread;

use corebus_protocol::Event;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use super::*;
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

struct SleepyHandler(Duration);

impl EventHandler for SleepyHandler {
    fn handle(
        &self,
        _event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        thread::sleep(self.0);
        Ok(Some(json!("late")))
    }
}

struct PanickingHandler;

impl EventHandler for PanickingHandler {
    fn handle(
        &self,
        _event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        panic!("kaboom");
    }
}

#[test]
fn execute_local_success() {
    let registry = HandlerRegistry::new();
    registry.register_with::<EchoHandler, _>("local_echo", || EchoHandler);
    let mut storage = ThreadStorage::new();

    let event = Event::new("local_echo", json!("hi"));
    let data = execute_local(&registry, &mut storage, None, &event).unwrap();
    assert_eq!(data, Some(json!("hi")));
}

#[test]
fn execute_local_missing_handler() {
    let registry = HandlerRegistry::new();
    let mut storage = ThreadStorage::new();
    let event = Event::new("nobody_home", Value::Null);
    let err = execute_local(&registry, &mut storage, None, &event).unwrap_err();
    assert_eq!(err, EventError::no_handler("nobody_home"));
}

#[test]
fn execute_local_normalizes_panics() {
    let registry = HandlerRegistry::new();
    registry.register_with::<PanickingHandler, _>("boom", || PanickingHandler);
    let mut storage = ThreadStorage::new();
    let event = Event::new("boom", Value::Null);
    let err = execute_local(&registry, &mut storage, None, &event).unwrap_err();
    assert_eq!(err.kind(), "execution");
    assert!(err.to_string().contains("kaboom"));
}

#[test]
fn execute_local_observes_cooperative_timeout() {
    let registry = HandlerRegistry::new();
    registry.register_with::<SleepyHandler, _>("oversleeper", || {
        SleepyHandler(Duration::from_millis(1200))
    });
    let mut storage = ThreadStorage::new();
    let event = Event::new("oversleeper", Value::Null).with_timeout_secs(1);
    let err = execute_local(&registry, &mut storage, None, &event).unwrap_err();
    assert_eq!(err, EventError::Timeout { timeout_secs: 1 });
}

#[test]
fn handler_instances_cached_per_storage() {
    static BUILDS: AtomicU32 = AtomicU32::new(0);

    struct Counted;
    impl EventHandler for Counted {
        fn handle(
            &self,
            _event: &Event,
            _ctx: &mut EventContext<'_>,
        ) -> Result<Option<Value>, EventError> {
            Ok(None)
        }
    }

    let registry = HandlerRegistry::new();
    registry.register_with::<Counted, _>("counted", || {
        BUILDS.fetch_add(1, AtomicOrdering::SeqCst);
        Counted
    });

    // One build happens at registration to sample the preferred mode.
    let baseline = BUILDS.load(AtomicOrdering::SeqCst);

    let mut storage = ThreadStorage::new();
    let event = Event::new("counted", Value::Null);
    execute_local(&registry, &mut storage, None, &event).unwrap();
    execute_local(&registry, &mut storage, None, &event).unwrap();
    assert_eq!(BUILDS.load(AtomicOrdering::SeqCst), baseline + 1);

    // A different storage (another thread's) builds its own instance.
    let mut other = ThreadStorage::new();
    execute_local(&registry, &mut other, None, &event).unwrap();
    assert_eq!(BUILDS.load(AtomicOrdering::SeqCst), baseline + 2);
}

#[test]
fn cmd_events_resolve_to_internal_handler() {
    let registry = HandlerRegistry::new();
    let mut storage = ThreadStorage::new();
    let event = Event::new("my_command", json!({"command": "printf out"}))
        .with_exec_mode(ExecMode::Cmd);
    let data = execute_local(&registry, &mut storage, None, &event)
        .unwrap()
        .unwrap();
    let outcome: CmdOutcome = serde_json::from_value(data).unwrap();
    assert_eq!(outcome.stdout, "out");
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn thread_context_carries_thread_id() {
    struct ThreadIdProbe;
    impl EventHandler for ThreadIdProbe {
        fn handle(
            &self,
            _event: &Event,
            ctx: &mut EventContext<'_>,
        ) -> Result<Option<Value>, EventError> {
            Ok(Some(json!(ctx.thread_id.clone())))
        }
    }

    let registry = HandlerRegistry::new();
    registry.register_with::<ThreadIdProbe, _>("probe", || ThreadIdProbe);
    let mut storage = ThreadStorage::new();
    let event = Event::new("probe", Value::Null);
    let data = execute_local(&registry, &mut storage, Some("worker-7".into()), &event)
        .unwrap()
        .unwrap();
    assert_eq!(data, json!("worker-7"));
}
