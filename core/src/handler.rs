//! The handler interface and the per-execution context passed to it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::ExecMode;
use serde_json::Value;

/// A user-supplied component processing events of one type.
///
/// Handlers must be stateless with respect to individual events; anything
/// expensive (connections, caches) belongs in the context's
/// [`ThreadStorage`], which stays with the executing thread or worker
/// process across events.
pub trait EventHandler: Send + Sync {
    /// Execution mode the bus uses when the event does not override one.
    fn preferred_exec_mode(&self) -> ExecMode {
        ExecMode::Thread
    }

    /// Process one event. `Ok(None)` is success without a produced value.
    fn handle(
        &self,
        event: &Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError>;
}

impl std::fmt::Debug for dyn EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn EventHandler")
    }
}

/// Typed, string-keyed storage owned by one thread or worker process.
///
/// The Rust rendition of thread-local handler state: each pool thread and
/// each worker process owns exactly one, hands it to every handler it
/// runs, and never shares it, so access needs no locking.
#[derive(Default)]
pub struct ThreadStorage {
    slots: HashMap<String, Box<dyn Any + Send>>,
}

impl ThreadStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a value previously stored under `key`, if the type matches.
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.slots.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.slots.get_mut(key).and_then(|v| v.downcast_mut())
    }

    /// Store a value, replacing whatever was under `key`.
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Box::new(value));
    }

    /// Fetch the value under `key`, initializing it with `init` on first
    /// use. This is the caching pattern handlers use for expensive
    /// resources.
    pub fn get_or_insert_with<T: Any + Send>(
        &mut self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> &mut T {
        // A slot holding a different type counts as absent; the typed API
        // never hands out a mismatched value.
        let needs_init = !matches!(self.slots.get(key), Some(slot) if slot.is::<T>());
        if needs_init {
            self.slots.insert(key.to_string(), Box::new(init()));
        }
        match self.slots.get_mut(key).and_then(|slot| slot.downcast_mut()) {
            Some(value) => value,
            None => unreachable!("slot initialized above"),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Latest "still alive" evidence recorded by a handler inside a worker
/// process, surfaced to the pool on the next health probe.
#[derive(Debug, Clone)]
pub struct AliveRecord {
    pub timestamp: DateTime<Utc>,
    pub status: Option<String>,
}

/// Shared slot the worker's health thread reads and the executing handler
/// writes through [`EventContext::send_alive`].
#[derive(Debug, Default)]
pub struct AliveSignal {
    latest: Mutex<Option<AliveRecord>>,
}

impl AliveSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: Option<String>) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(AliveRecord {
            timestamp: Utc::now(),
            status,
        });
    }

    /// Take the latest record, clearing the slot.
    pub fn take(&self) -> Option<AliveRecord> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Per-execution scratch area handed to every [`EventHandler::handle`]
/// call.
pub struct EventContext<'a> {
    /// Storage private to the executing thread / worker process.
    pub storage: &'a mut ThreadStorage,
    /// Identifier of the executing thread, where applicable.
    pub thread_id: Option<String>,
    /// Process id, set in worker processes.
    pub process_id: Option<u32>,
    /// Cooperative deadline. Handlers that may block should check it.
    pub deadline: Option<Instant>,
    /// Context creation time.
    pub timestamp: DateTime<Utc>,
    alive: Option<&'a AliveSignal>,
}

impl<'a> EventContext<'a> {
    /// Context for inline execution on the publisher's thread.
    pub fn for_sync(storage: &'a mut ThreadStorage) -> Self {
        Self {
            storage,
            thread_id: None,
            process_id: None,
            deadline: None,
            timestamp: Utc::now(),
            alive: None,
        }
    }

    /// Context for a pool worker thread.
    pub fn for_thread(storage: &'a mut ThreadStorage, thread_id: String) -> Self {
        Self {
            storage,
            thread_id: Some(thread_id),
            process_id: None,
            deadline: None,
            timestamp: Utc::now(),
            alive: None,
        }
    }

    /// Context inside a worker process; `alive` links
    /// [`EventContext::send_alive`] to the worker's health thread.
    pub fn for_worker(storage: &'a mut ThreadStorage, alive: &'a AliveSignal) -> Self {
        Self {
            storage,
            thread_id: None,
            process_id: Some(std::process::id()),
            deadline: None,
            timestamp: Utc::now(),
            alive: Some(alive),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time left until the cooperative deadline. `None` when no deadline
    /// applies; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Signal from a long computation that the handler is still making
    /// progress. Outside corelet mode this is a no-op: liveness of pool
    /// threads is not monitored.
    pub fn send_alive(&self, status: impl Into<String>) {
        if let Some(alive) = self.alive {
            alive.record(Some(status.into()));
        }
    }
}

#[cfg(test)]
#[path = "handler.test.rs"]
mod tests;
