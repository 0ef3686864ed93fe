use corebus_core::ExecMode;
use corebus_core::ThreadStorage;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

fn run(handler: &dyn EventHandler, event: &Event) -> Result<Option<Value>, EventError> {
    let mut storage = ThreadStorage::new();
    let mut ctx = EventContext::for_sync(&mut storage);
    handler.handle(event, &mut ctx)
}

#[test]
fn echo_returns_payload() {
    let event = Event::new(ECHO_EVENT, json!({"k": "v"}));
    assert_eq!(run(&EchoHandler, &event).unwrap(), Some(json!({"k": "v"})));
}

#[test]
fn sleep_reports_duration() {
    let event = Event::new(SLEEP_EVENT, json!({"duration_ms": 10}));
    let value = run(&SleepHandler::default(), &event).unwrap().unwrap();
    assert_eq!(value, json!({"slept_ms": 10}));
}

#[test]
fn sleep_rejects_bad_payload() {
    let event = Event::new(SLEEP_EVENT, json!("nope"));
    assert_eq!(
        run(&SleepHandler::default(), &event).unwrap_err().kind(),
        "execution"
    );
}

#[test]
fn flaky_fails_then_succeeds() {
    let handler = FlakyHandler::default();
    let event = Event::new(FLAKY_EVENT, json!({"fail_times": 2}));
    assert!(run(&handler, &event).is_err());
    assert!(run(&handler, &event).is_err());
    let value = run(&handler, &event).unwrap().unwrap();
    assert_eq!(value, json!({"succeeded_on": 3}));
}

#[test]
fn monte_carlo_estimates_pi() {
    let event = Event::new(MONTE_CARLO_EVENT, json!({"samples": 200_000}));
    let value = run(&MonteCarloPiHandler, &event).unwrap().unwrap();
    let pi = value["pi"].as_f64().unwrap();
    assert!((pi - std::f64::consts::PI).abs() < 0.1, "estimate was {pi}");
}

#[test]
fn demo_registrations_cover_all_types() {
    register_demo_handlers();
    let registry = HandlerRegistry::global();
    for event_type in [ECHO_EVENT, SLEEP_EVENT, FLAKY_EVENT, MONTE_CARLO_EVENT] {
        assert!(registry.is_registered(event_type));
        assert_eq!(
            registry.preferred_exec_mode(event_type),
            Some(ExecMode::Thread)
        );
    }
}
