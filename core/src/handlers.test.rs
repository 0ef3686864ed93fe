use std::time::Instant;

use corebus_protocol::Event;
use corebus_protocol::EventError;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::handler::ThreadStorage;

fn cmd_event(command: &str, timeout_secs: u64) -> Event {
    Event::new("_cmd_execution", json!({ "command": command })).with_timeout_secs(timeout_secs)
}

fn run_cmd(event: &Event, with_deadline: bool) -> Result<Option<serde_json::Value>, EventError> {
    let handler = CmdHandler;
    let mut storage = ThreadStorage::new();
    let mut ctx = EventContext::for_sync(&mut storage);
    if with_deadline {
        ctx = ctx.with_deadline(Instant::now() + Duration::from_secs(event.timeout_secs));
    }
    handler.handle(event, &mut ctx)
}

#[test]
fn command_captures_stdout() {
    let event = cmd_event("printf hello", 10);
    let value = run_cmd(&event, true).unwrap().unwrap();
    let outcome: CmdOutcome = serde_json::from_value(value).unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.stdout, "hello");
    assert_eq!(outcome.stderr, "");
}

#[test]
fn command_captures_stderr_and_exit_code() {
    let event = cmd_event("printf oops >&2; exit 3", 10);
    let value = run_cmd(&event, true).unwrap().unwrap();
    let outcome: CmdOutcome = serde_json::from_value(value).unwrap();
    assert_eq!(outcome.exit_code, 3);
    assert_eq!(outcome.stderr, "oops");
}

#[test]
fn command_times_out_and_kills() {
    let mut event = cmd_event("sleep 10", 10);
    // Shrink the deadline below the sleep so the poll loop kills it.
    event.timeout_secs = 1;
    let handler = CmdHandler;
    let mut storage = ThreadStorage::new();
    let mut ctx = EventContext::for_sync(&mut storage)
        .with_deadline(Instant::now() + Duration::from_millis(200));
    let started = Instant::now();
    let err = handler.handle(&event, &mut ctx).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err, EventError::Timeout { timeout_secs: 1 });
}

#[test]
fn invalid_payload_is_execution_error() {
    let event = Event::new("_cmd_execution", json!({"not_command": true}));
    let err = run_cmd(&event, true).unwrap_err();
    assert_eq!(err.kind(), "execution");
}

#[test]
fn shutdown_handler_is_trivially_ok() {
    let handler = ShutdownHandler;
    let mut storage = ThreadStorage::new();
    let mut ctx = EventContext::for_sync(&mut storage);
    let event = Event::new("_shutdown", serde_json::Value::Null);
    assert_eq!(handler.handle(&event, &mut ctx).unwrap(), None);
}

#[test]
fn cmd_handler_prefers_cmd_mode() {
    assert_eq!(CmdHandler.preferred_exec_mode(), ExecMode::Cmd);
}
