//! Event descriptors submitted to the bus.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::progress::ProgressTracker;
use crate::result::EventError;

/// Default execution priority (middle of the 0..=10 range).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Highest allowed priority. Builder setters clamp to this.
pub const MAX_PRIORITY: u8 = 10;

/// Default per-event processing timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retry attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Internal event type that tells a pool worker to stop draining the queue.
pub const EVENT_TYPE_SHUTDOWN: &str = "_shutdown";

/// Internal event type whose handler runs a shell command (`cmd` mode).
pub const EVENT_TYPE_CMD_EXECUTION: &str = "_cmd_execution";

/// How an event is executed once the bus accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Inline on the publisher's thread; the result is stored before
    /// `publish` returns.
    Sync,
    /// On the worker-thread pool, ordered by priority.
    Thread,
    /// In an isolated worker process reached over the task pipe.
    Corelet,
    /// Shell-command execution, routed through the thread pool.
    Cmd,
}

impl ExecMode {
    /// Get the mode as its wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Sync => "sync",
            ExecMode::Thread => "thread",
            ExecMode::Corelet => "corelet",
            ExecMode::Cmd => "cmd",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecMode {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecMode::Sync),
            "thread" => Ok(ExecMode::Thread),
            "corelet" => Ok(ExecMode::Corelet),
            "cmd" => Ok(ExecMode::Cmd),
            other => Err(EventError::validation(format!(
                "invalid execution mode '{other}'"
            ))),
        }
    }
}

/// Serializable identity of a registered handler.
///
/// `event_type` is the resolution key on both sides of the process
/// boundary; `module_path` and `handler_name` identify the concrete type
/// for diagnostics and must match what the worker registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerLocator {
    pub module_path: String,
    pub handler_name: String,
    pub event_type: String,
}

impl HandlerLocator {
    /// Build a locator for a concrete handler type, splitting
    /// `std::any::type_name` into module path and type name.
    pub fn of<H: 'static>(event_type: impl Into<String>) -> Self {
        let full = std::any::type_name::<H>();
        let (module_path, handler_name) = match full.rsplit_once("::") {
            Some((module, name)) => (module.to_string(), name.to_string()),
            None => (String::new(), full.to_string()),
        };
        Self {
            module_path,
            handler_name,
            event_type: event_type.into(),
        }
    }
}

/// A unit of work submitted to the bus.
///
/// Events are immutable from the publisher's point of view: construct one
/// with [`Event::new`] plus the `with_*` setters, then hand it to
/// `publish`. After publish the bus owns the event until its result is
/// retrieved.
#[derive(Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, stamped at construction.
    pub event_id: String,
    /// Registry key used to route to a handler.
    pub event_type: String,
    /// Execution mode override. When absent, the bus falls back to the
    /// registered handler's preferred mode.
    pub exec_mode: Option<ExecMode>,
    /// Opaque payload. Must be serializable, which `Value` guarantees, so
    /// corelet events can cross the process boundary.
    pub data: Value,
    /// Processing timeout in seconds. Must be at least 1.
    pub timeout_secs: u64,
    /// Retry attempts allowed after the first failure.
    pub max_retries: u32,
    /// Execution priority, 0..=10, higher runs earlier.
    pub priority: u8,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Handler identity for corelet execution. Auto-filled from the
    /// registry when the event is published without one.
    pub handler_locator: Option<HandlerLocator>,
    /// Observer notified on publish / start / completion. Never serialized;
    /// the publisher side drives it even for corelet events.
    #[serde(skip)]
    pub progress_tracker: Option<Arc<dyn ProgressTracker>>,
    /// Steps to advance the tracker by on completion.
    pub progress_steps: u64,
}

impl Event {
    /// Create an event with defaults: no mode override, priority 5,
    /// 30s timeout, 3 retries.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            exec_mode: None,
            data,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: DEFAULT_PRIORITY,
            timestamp: Utc::now(),
            handler_locator: None,
            progress_tracker: None,
            progress_steps: 0,
        }
    }

    /// Override the execution mode.
    pub fn with_exec_mode(mut self, mode: ExecMode) -> Self {
        self.exec_mode = Some(mode);
        self
    }

    /// Set the processing timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the priority, clamped to [`MAX_PRIORITY`].
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    /// Attach a progress tracker advanced by `steps` on completion.
    pub fn with_progress(mut self, tracker: Arc<dyn ProgressTracker>, steps: u64) -> Self {
        self.progress_tracker = Some(tracker);
        self.progress_steps = steps;
        self
    }

    /// Check the invariants `publish` enforces before accepting an event.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.is_empty() {
            return Err(EventError::validation("event_type cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(EventError::validation("timeout_secs must be at least 1"));
        }
        if self.priority > MAX_PRIORITY {
            return Err(EventError::validation(format!(
                "priority {} exceeds the maximum of {MAX_PRIORITY}",
                self.priority
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_id", &self.event_id)
            .field("event_type", &self.event_type)
            .field("exec_mode", &self.exec_mode)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .field("timestamp", &self.timestamp)
            .field("handler_locator", &self.handler_locator)
            .field("progress_tracker", &self.progress_tracker.is_some())
            .field("progress_steps", &self.progress_steps)
            .finish()
    }
}

#[cfg(test)]
#[path = "event.test.rs"]
mod tests;
