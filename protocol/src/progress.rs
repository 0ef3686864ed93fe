//! Observer interface for event lifecycle progress.
//!
//! The bus notifies a tracker as an event traverses published → started →
//! completed. Implementations are externally owned; the bus only holds a
//! reference and calls in, never under a lock.

/// Lifecycle callbacks invoked by the bus.
///
/// Each event notifies `on_completed` exactly once, with `success = false`
/// for any terminal failure. Callbacks must not block for long: they run on
/// publisher and pool threads.
pub trait ProgressTracker: Send + Sync {
    /// The event entered the system.
    fn on_published(&self, event_id: &str, event_type: &str);

    /// A handler began processing the event. Retried events start once per
    /// attempt.
    fn on_started(&self, event_id: &str, event_type: &str);

    /// The event finalized. `steps` is the event's configured advance
    /// amount.
    fn on_completed(&self, event_id: &str, event_type: &str, success: bool, steps: u64);
}

/// Tracker that does nothing. Useful as an explicit "no tracking" value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressTracker;

impl ProgressTracker for NoOpProgressTracker {
    fn on_published(&self, _event_id: &str, _event_type: &str) {}

    fn on_started(&self, _event_id: &str, _event_type: &str) {}

    fn on_completed(&self, _event_id: &str, _event_type: &str, _success: bool, _steps: u64) {}
}
