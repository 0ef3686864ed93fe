//! Data model and wire format for the corebus event system.
//!
//! This crate holds everything that crosses a boundary: the [`Event`]
//! descriptor submitted by publishers, the [`EventResult`] handed back to
//! them, the error taxonomy observable on results, the records exchanged
//! with worker processes over the task and health pipes, and the
//! length-prefixed framing codec both ends of a pipe agree on.
//!
//! The execution engine lives in `corebus-core`; this crate stays free of
//! engine concerns so worker processes and embedding applications can share
//! the types without pulling in the pools.

mod codec;
mod event;
mod progress;
mod result;
mod wire;

pub use codec::CodecError;
pub use codec::MAX_FRAME_LEN;
pub use codec::recv_frame;
pub use codec::recv_record;
pub use codec::send_frame;
pub use codec::send_record;
pub use event::DEFAULT_MAX_RETRIES;
pub use event::DEFAULT_PRIORITY;
pub use event::DEFAULT_TIMEOUT_SECS;
pub use event::EVENT_TYPE_CMD_EXECUTION;
pub use event::EVENT_TYPE_SHUTDOWN;
pub use event::Event;
pub use event::ExecMode;
pub use event::HandlerLocator;
pub use event::MAX_PRIORITY;
pub use progress::NoOpProgressTracker;
pub use progress::ProgressTracker;
pub use result::EventError;
pub use result::EventResult;
pub use wire::HealthRecord;
pub use wire::REGISTRATION_ACK;
pub use wire::TaskRecord;
