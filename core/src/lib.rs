//! The corebus execution engine.
//!
//! A single [`EventBus`] accepts published [`Event`]s, routes each one by
//! execution mode — inline on the caller's thread, onto a priority-ordered
//! worker-thread pool, or into a reusable worker process — and surfaces
//! outcomes through an id-keyed, condvar-backed result store.
//!
//! Handlers implement [`EventHandler`] and are looked up through the
//! process-global [`HandlerRegistry`]. Worker processes run
//! [`worker::run`] from a binary that registers the same handlers as the
//! publishing side; the `corebus-harness` crate shows the wiring.

mod bus;
mod config;
mod handler;
mod handlers;
mod process_pool;
mod progress;
mod registry;
mod results;
mod thread_pool;
pub mod worker;

pub use bus::EventBus;
pub use config::EventBusConfig;
pub use handler::AliveSignal;
pub use handler::EventContext;
pub use handler::EventHandler;
pub use handler::ThreadStorage;
pub use handlers::CmdOutcome;
pub use progress::ConsoleProgressTracker;
pub use registry::HandlerRegistry;

// Re-export the data model so embedders depend on one crate.
pub use corebus_protocol::DEFAULT_MAX_RETRIES;
pub use corebus_protocol::DEFAULT_PRIORITY;
pub use corebus_protocol::DEFAULT_TIMEOUT_SECS;
pub use corebus_protocol::EVENT_TYPE_CMD_EXECUTION;
pub use corebus_protocol::EVENT_TYPE_SHUTDOWN;
pub use corebus_protocol::Event;
pub use corebus_protocol::EventError;
pub use corebus_protocol::EventResult;
pub use corebus_protocol::ExecMode;
pub use corebus_protocol::HandlerLocator;
pub use corebus_protocol::NoOpProgressTracker;
pub use corebus_protocol::ProgressTracker;
