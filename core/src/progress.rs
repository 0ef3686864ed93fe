//! Progress fan-out helpers and the console renderer.

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Mutex;

use corebus_protocol::Event;
use corebus_protocol::ProgressTracker;
use tracing::warn;

/// Notify `on_published`, isolating the bus from tracker panics.
pub(crate) fn notify_published(event: &Event) {
    if let Some(tracker) = &event.progress_tracker {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tracker.on_published(&event.event_id, &event.event_type);
        }));
        if outcome.is_err() {
            warn!(event_id = %event.event_id, "progress tracker panicked in on_published");
        }
    }
}

/// Notify `on_started` for one attempt.
pub(crate) fn notify_started(event: &Event) {
    if let Some(tracker) = &event.progress_tracker {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tracker.on_started(&event.event_id, &event.event_type);
        }));
        if outcome.is_err() {
            warn!(event_id = %event.event_id, "progress tracker panicked in on_started");
        }
    }
}

/// Notify `on_completed`. Called exactly once per event, after the result
/// is finalized.
pub(crate) fn notify_completed(event: &Event, success: bool) {
    if let Some(tracker) = &event.progress_tracker {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tracker.on_completed(
                &event.event_id,
                &event.event_type,
                success,
                event.progress_steps,
            );
        }));
        if outcome.is_err() {
            warn!(event_id = %event.event_id, "progress tracker panicked in on_completed");
        }
    }
}

#[derive(Debug, Default)]
struct ConsoleState {
    published: u64,
    completed: u64,
    succeeded: u64,
    failed: u64,
    steps_done: u64,
}

/// Tracker that renders a single status line on stderr.
///
/// When constructed without a total, the published count becomes the
/// moving total, mirroring a counter-style progress bar.
pub struct ConsoleProgressTracker {
    desc: String,
    total: Option<u64>,
    state: Mutex<ConsoleState>,
}

impl ConsoleProgressTracker {
    pub fn new(desc: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            desc: desc.into(),
            total,
            state: Mutex::new(ConsoleState::default()),
        }
    }

    /// Terminate the status line. Call once after the tracked batch is
    /// done.
    pub fn finish(&self) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err);
    }

    /// (completed, succeeded, failed) so far.
    pub fn counts(&self) -> (u64, u64, u64) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.completed, state.succeeded, state.failed)
    }

    /// Steps advanced so far via `progress_steps`.
    pub fn steps_done(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.steps_done
    }

    fn render(&self, state: &ConsoleState) {
        let total = self.total.unwrap_or(state.published);
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\r{}: {}/{} (ok {}, failed {})",
            self.desc, state.completed, total, state.succeeded, state.failed
        );
        let _ = err.flush();
    }
}

impl ProgressTracker for ConsoleProgressTracker {
    fn on_published(&self, _event_id: &str, _event_type: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.published += 1;
        self.render(&state);
    }

    fn on_started(&self, _event_id: &str, _event_type: &str) {}

    fn on_completed(&self, _event_id: &str, _event_type: &str, success: bool, steps: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.completed += 1;
        state.steps_done += steps.max(1);
        if success {
            state.succeeded += 1;
        } else {
            state.failed += 1;
        }
        self.render(&state);
    }
}

#[cfg(test)]
#[path = "progress.test.rs"]
mod tests;
