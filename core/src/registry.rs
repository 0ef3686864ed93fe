//! Process-global map from event type to handler factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use corebus_protocol::EVENT_TYPE_CMD_EXECUTION;
use corebus_protocol::EVENT_TYPE_SHUTDOWN;
use corebus_protocol::EventError;
use corebus_protocol::ExecMode;
use corebus_protocol::HandlerLocator;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::handler::EventHandler;
use crate::handlers::CmdHandler;
use crate::handlers::ShutdownHandler;

static GLOBAL_REGISTRY: Lazy<HandlerRegistry> = Lazy::new(HandlerRegistry::new);

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn EventHandler> + Send + Sync>;

struct RegistryEntry {
    factory: HandlerFactory,
    locator: HandlerLocator,
    preferred_mode: ExecMode,
}

/// Thread-safe registry of handler factories, shared by the bus, the
/// worker-process entrypoint, and user code.
///
/// Entries are never removed; re-registering an event type replaces the
/// previous entry (last writer wins). The lock is read-heavy and is never
/// held across handler code: factories run after the guard is dropped.
pub struct HandlerRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        let registry = Self {
            entries: RwLock::new(HashMap::new()),
        };
        registry.register::<ShutdownHandler>(EVENT_TYPE_SHUTDOWN);
        registry.register::<CmdHandler>(EVENT_TYPE_CMD_EXECUTION);
        registry
    }

    /// The process-wide singleton every component resolves against.
    pub fn global() -> &'static HandlerRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register `H` for `event_type`, constructing instances with
    /// `H::default()`.
    pub fn register<H>(&self, event_type: &str)
    where
        H: EventHandler + Default + 'static,
    {
        self.register_with::<H, _>(event_type, H::default);
    }

    /// Register `H` for `event_type` with a custom constructor, e.g. to
    /// close over configuration.
    pub fn register_with<H, F>(&self, event_type: &str, factory: F)
    where
        H: EventHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let locator = HandlerLocator::of::<H>(event_type);
        let factory: HandlerFactory = Arc::new(move || Arc::new(factory()));
        // Sample the preferred mode once so publish can default the
        // execution mode without building handlers per event.
        let preferred_mode = factory().preferred_exec_mode();
        debug!(
            event_type,
            handler = %locator.handler_name,
            mode = %preferred_mode,
            "registered event handler"
        );
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            event_type.to_string(),
            RegistryEntry {
                factory,
                locator,
                preferred_mode,
            },
        );
    }

    /// Instantiate the handler registered for `event_type`.
    pub fn create(&self, event_type: &str) -> Result<Arc<dyn EventHandler>, EventError> {
        let factory = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .get(event_type)
                .map(|entry| Arc::clone(&entry.factory))
        };
        match factory {
            Some(factory) => Ok(factory()),
            None => Err(EventError::no_handler(event_type)),
        }
    }

    /// Serializable handler identity, used when an event crosses the
    /// process boundary.
    pub fn locator(&self, event_type: &str) -> Result<HandlerLocator, EventError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(event_type)
            .map(|entry| entry.locator.clone())
            .ok_or_else(|| EventError::no_handler(event_type))
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(event_type)
    }

    /// Preferred execution mode recorded at registration, if the type is
    /// known.
    pub fn preferred_exec_mode(&self, event_type: &str) -> Option<ExecMode> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(event_type).map(|entry| entry.preferred_mode)
    }

    /// All registered event types, including the built-in internals.
    pub fn registered_event_types(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "registry.test.rs"]
mod tests;
