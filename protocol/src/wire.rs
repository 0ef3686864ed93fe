//! Records exchanged between the worker-process pool and its workers.
//!
//! Both pipes carry length-prefixed JSON (see [`crate::codec`]); the
//! records here are the payloads. The task pipe moves work and results,
//! the health pipe moves liveness traffic, and each record is
//! self-describing through its `type` tag.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::event::Event;
use crate::event::HandlerLocator;
use crate::result::EventError;

/// Payload of the acknowledgement a worker sends for a registration-only
/// task record.
pub const REGISTRATION_ACK: &str = "registered";

/// Task-pipe records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRecord {
    /// Pool → worker: load and cache the handler for a type before any
    /// event of that type is dispatched.
    Register { locator: HandlerLocator },

    /// Pool → worker: execute one event.
    Task { event: Event },

    /// Worker → pool: outcome of a task or a registration.
    Result {
        event_id: String,
        success: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<EventError>,
    },

    /// Pool → worker: stop after the current record.
    Shutdown,

    /// Worker → pool: shutdown acknowledged on the task pipe.
    ShutdownAck,
}

impl TaskRecord {
    /// Build the acknowledgement for a successful registration.
    pub fn registration_ack(event_type: impl Into<String>) -> Self {
        TaskRecord::Result {
            event_id: event_type.into(),
            success: true,
            data: Some(Value::String(REGISTRATION_ACK.to_string())),
            error: None,
        }
    }
}

/// Health-pipe records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthRecord {
    /// Pool → worker: liveness probe.
    Ping,

    /// Worker → pool: probe reply carrying the latest alive evidence. The
    /// status is whatever the handler last passed to `send_alive`.
    Pong {
        last_alive: DateTime<Utc>,
        #[serde(default)]
        status: Option<String>,
    },

    /// Worker → pool: unsolicited in-band progress from a long handler.
    Alive { status: String },

    /// Worker → pool: the worker is terminating (self-declared death or
    /// idle timeout).
    Died { worker_id: String },

    /// Pool → worker: terminate gracefully.
    Shutdown,

    /// Worker → pool: graceful termination finished.
    ShutdownComplete { worker_id: String },
}

#[cfg(test)]
#[path = "wire.test.rs"]
mod tests;
