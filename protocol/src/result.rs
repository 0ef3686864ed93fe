//! Outcome records and the error taxonomy observable on them.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Every way an event can fail, as observed on an [`EventResult`].
///
/// The taxonomy is part of the wire format: a worker process reports
/// failures by embedding one of these in a `RESULT` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventError {
    /// The event was rejected at publish. Never retried; `publish` returns
    /// this synchronously.
    #[error("invalid event: {message}")]
    Validation { message: String },

    /// No registry entry for the event type. Terminal, no retry.
    #[error("no handler registered for event type '{event_type}'")]
    NoHandler { event_type: String },

    /// The handler returned an error. Retried up to the event's budget.
    #[error("handler execution failed: {message}")]
    Execution { message: String },

    /// The handler did not finish within its budget. For corelet events the
    /// worker process is destroyed as well.
    #[error("handler did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The health monitor declared the worker dead, or a pipe hit EOF.
    #[error("worker process '{worker_id}' died")]
    WorkerDied { worker_id: String },

    /// `publish` was called after `shutdown` began. Never retried.
    #[error("event bus is shutting down")]
    ShutdownInProgress,
}

impl EventError {
    pub fn validation(message: impl Into<String>) -> Self {
        EventError::Validation {
            message: message.into(),
        }
    }

    pub fn no_handler(event_type: impl Into<String>) -> Self {
        EventError::NoHandler {
            event_type: event_type.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        EventError::Execution {
            message: message.into(),
        }
    }

    /// True for errors that may be retried under the event's retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventError::Execution { .. }
                | EventError::Timeout { .. }
                | EventError::WorkerDied { .. }
        )
    }

    /// Short identifier for logs and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            EventError::Validation { .. } => "validation",
            EventError::NoHandler { .. } => "no_handler",
            EventError::Execution { .. } => "execution",
            EventError::Timeout { .. } => "timeout",
            EventError::WorkerDied { .. } => "worker_died",
            EventError::ShutdownInProgress => "shutdown_in_progress",
        }
    }
}

/// Finalized outcome of one event, keyed by `event_id`.
///
/// Exactly one of `data` and `error` is populated; the constructors are the
/// only way the engine builds one, which keeps that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    pub event_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<EventError>,
    /// Number of executions performed, including the first. Never exceeds
    /// `max_retries + 1`.
    pub attempts: u32,
}

impl EventResult {
    /// Successful outcome. `data` of `None` means the handler completed
    /// without producing a value.
    pub fn ok(event_id: impl Into<String>, data: Option<Value>, attempts: u32) -> Self {
        Self {
            event_id: event_id.into(),
            success: true,
            data,
            error: None,
            attempts,
        }
    }

    /// Terminal failure.
    pub fn failed(event_id: impl Into<String>, error: EventError, attempts: u32) -> Self {
        Self {
            event_id: event_id.into(),
            success: false,
            data: None,
            error: Some(error),
            attempts,
        }
    }
}

#[cfg(test)]
#[path = "result.test.rs"]
mod tests;
