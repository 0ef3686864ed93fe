use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use corebus_protocol::EventError;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

fn ok(id: &str) -> EventResult {
    EventResult::ok(id, Some(json!("done")), 1)
}

#[test]
fn finalize_then_take_removes() {
    let store = ResultStore::new();
    store.register_pending("a");
    store.finalize(ok("a"));

    let taken = store.take(&["a".to_string()], true);
    assert_eq!(taken.len(), 1);
    assert!(taken["a"].success);

    let again = store.take(&["a".to_string()], true);
    assert!(again.is_empty());
}

#[test]
fn unknown_ids_do_not_block() {
    let store = ResultStore::new();
    let start = Instant::now();
    let taken = store.take(&["never-published".to_string()], true);
    assert!(taken.is_empty());
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn join_before_waits_for_finalization() {
    let store = Arc::new(ResultStore::new());
    store.register_pending("slow");

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            store.finalize(EventResult::failed(
                "slow",
                EventError::execution("late"),
                2,
            ));
        })
    };

    let start = Instant::now();
    let taken = store.take(&["slow".to_string()], true);
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert_eq!(taken["slow"].attempts, 2);
    writer.join().unwrap();
}

#[test]
fn join_waits_for_all_pending() {
    let store = Arc::new(ResultStore::new());
    store.register_pending("x");
    store.register_pending("y");

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            store.finalize(ok("x"));
            thread::sleep(Duration::from_millis(50));
            store.finalize(ok("y"));
        })
    };

    store.join();
    assert_eq!(store.pending_count(), 0);
    writer.join().unwrap();
    assert_eq!(store.take_all().len(), 2);
}

#[test]
fn shutdown_wakes_waiters() {
    let store = Arc::new(ResultStore::new());
    store.register_pending("stuck");

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.take(&["stuck".to_string()], true))
    };

    thread::sleep(Duration::from_millis(50));
    store.shutdown();
    let taken = waiter.join().unwrap();
    // Never finalized, so nothing to hand back, but the wait returned.
    assert!(taken.is_empty());
}

#[test]
fn take_all_drains() {
    let store = ResultStore::new();
    store.register_pending("a");
    store.register_pending("b");
    store.finalize(ok("a"));
    store.finalize(ok("b"));
    assert_eq!(store.take_all().len(), 2);
    assert!(store.take_all().is_empty());
}

#[test]
fn partial_take_leaves_the_rest() {
    let store = ResultStore::new();
    store.register_pending("a");
    store.register_pending("b");
    store.finalize(ok("a"));
    store.finalize(ok("b"));

    let taken = store.take(&["a".to_string()], false);
    assert_eq!(taken.len(), 1);
    let rest = store.take_all();
    assert_eq!(rest.len(), 1);
    assert!(rest.contains_key("b"));
}
