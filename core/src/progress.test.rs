use std::sync::Arc;

use corebus_protocol::Event;
use corebus_protocol::ProgressTracker;
use pretty_assertions::assert_eq;
use serde_json::Value;

use super::*;

struct PanickyTracker;

impl ProgressTracker for PanickyTracker {
    fn on_published(&self, _event_id: &str, _event_type: &str) {
        panic!("tracker bug");
    }

    fn on_started(&self, _event_id: &str, _event_type: &str) {
        panic!("tracker bug");
    }

    fn on_completed(&self, _event_id: &str, _event_type: &str, _success: bool, _steps: u64) {
        panic!("tracker bug");
    }
}

#[test]
fn tracker_panics_are_swallowed() {
    let event =
        Event::new("panicky", Value::Null).with_progress(Arc::new(PanickyTracker), 1);
    notify_published(&event);
    notify_started(&event);
    notify_completed(&event, false);
}

#[test]
fn events_without_tracker_are_fine() {
    let event = Event::new("plain", Value::Null);
    notify_published(&event);
    notify_started(&event);
    notify_completed(&event, true);
}

#[test]
fn console_tracker_counts() {
    let tracker = ConsoleProgressTracker::new("testing", Some(3));
    tracker.on_published("e1", "t");
    tracker.on_published("e2", "t");
    tracker.on_started("e1", "t");
    tracker.on_completed("e1", "t", true, 0);
    tracker.on_completed("e2", "t", false, 0);
    let (completed, succeeded, failed) = tracker.counts();
    assert_eq!((completed, succeeded, failed), (2, 1, 1));
    tracker.finish();
}

#[test]
fn console_tracker_advances_steps() {
    let tracker = ConsoleProgressTracker::new("steps", None);
    tracker.on_completed("e1", "t", true, 5);
    // Zero steps still advance the counter by one completed unit.
    tracker.on_completed("e2", "t", true, 0);
    assert_eq!(tracker.steps_done(), 6);
}

#[test]
fn completed_forwards_configured_steps() {
    struct StepProbe(std::sync::Mutex<u64>);
    impl ProgressTracker for StepProbe {
        fn on_published(&self, _: &str, _: &str) {}
        fn on_started(&self, _: &str, _: &str) {}
        fn on_completed(&self, _: &str, _: &str, _success: bool, steps: u64) {
            *self.0.lock().unwrap() = steps;
        }
    }

    let probe = Arc::new(StepProbe(std::sync::Mutex::new(0)));
    let event = Event::new("stepped", Value::Null).with_progress(probe.clone(), 7);
    notify_completed(&event, true);
    assert_eq!(*probe.0.lock().unwrap(), 7);
}
