use corebus_protocol::Event;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use super::*;
use crate::handler::EventContext;

#[derive(Default)]
struct StaticHandler(&'static str);

impl EventHandler for StaticHandler {
    fn handle(
        &self,
        _event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        Ok(Some(json!(self.0)))
    }
}

#[derive(Default)]
struct SyncPreferringHandler;

impl EventHandler for SyncPreferringHandler {
    fn preferred_exec_mode(&self) -> ExecMode {
        ExecMode::Sync
    }

    fn handle(
        &self,
        _event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        Ok(None)
    }
}

fn run(registry: &HandlerRegistry, event_type: &str) -> Option<Value> {
    let handler = registry.create(event_type).unwrap();
    let mut storage = crate::handler::ThreadStorage::new();
    let mut ctx = EventContext::for_sync(&mut storage);
    handler
        .handle(&Event::new(event_type, Value::Null), &mut ctx)
        .unwrap()
}

#[test]
fn internals_pre_registered() {
    let registry = HandlerRegistry::new();
    assert!(registry.is_registered(EVENT_TYPE_SHUTDOWN));
    assert!(registry.is_registered(EVENT_TYPE_CMD_EXECUTION));
    let types = registry.registered_event_types();
    assert!(types.contains(&EVENT_TYPE_SHUTDOWN.to_string()));
    assert!(types.contains(&EVENT_TYPE_CMD_EXECUTION.to_string()));
}

#[test]
fn register_then_lookup() {
    let registry = HandlerRegistry::new();
    assert!(!registry.is_registered("lookup"));
    registry.register_with::<StaticHandler, _>("lookup", || StaticHandler("first"));
    assert!(registry.is_registered("lookup"));
    assert_eq!(run(&registry, "lookup"), Some(json!("first")));
}

#[test]
fn last_writer_wins() {
    let registry = HandlerRegistry::new();
    registry.register_with::<StaticHandler, _>("contested", || StaticHandler("old"));
    registry.register_with::<StaticHandler, _>("contested", || StaticHandler("new"));
    assert_eq!(run(&registry, "contested"), Some(json!("new")));
}

#[test]
fn create_missing_is_no_handler() {
    let registry = HandlerRegistry::new();
    let err = registry.create("ghost").unwrap_err();
    assert_eq!(err, EventError::no_handler("ghost"));
}

#[test]
fn locator_identifies_handler() {
    let registry = HandlerRegistry::new();
    registry.register::<SyncPreferringHandler>("locate_me");
    let locator = registry.locator("locate_me").unwrap();
    assert_eq!(locator.event_type, "locate_me");
    assert_eq!(locator.handler_name, "SyncPreferringHandler");
    assert!(locator.module_path.contains("registry"));
    assert!(registry.locator("ghost").is_err());
}

#[test]
fn preferred_mode_sampled_at_registration() {
    let registry = HandlerRegistry::new();
    registry.register::<SyncPreferringHandler>("prefers_sync");
    registry.register_with::<StaticHandler, _>("prefers_thread", || StaticHandler("x"));
    assert_eq!(
        registry.preferred_exec_mode("prefers_sync"),
        Some(ExecMode::Sync)
    );
    assert_eq!(
        registry.preferred_exec_mode("prefers_thread"),
        Some(ExecMode::Thread)
    );
    assert_eq!(registry.preferred_exec_mode("ghost"), None);
}

#[test]
fn global_is_a_singleton() {
    let a = HandlerRegistry::global();
    let b = HandlerRegistry::global();
    assert!(std::ptr::eq(a, b));
    assert!(a.is_registered(EVENT_TYPE_SHUTDOWN));
}
