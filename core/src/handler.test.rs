use std::time::Duration;
use std::time::Instant;

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn storage_typed_round_trip() {
    let mut storage = ThreadStorage::new();
    assert!(storage.is_empty());
    storage.insert("count", 41u64);
    assert_eq!(storage.get::<u64>("count"), Some(&41));
    *storage.get_mut::<u64>("count").unwrap() += 1;
    assert_eq!(storage.get::<u64>("count"), Some(&42));
}

#[test]
fn storage_type_mismatch_is_absence() {
    let mut storage = ThreadStorage::new();
    storage.insert("key", "text".to_string());
    assert_eq!(storage.get::<u64>("key"), None);
    // get_or_insert_with replaces a mismatched slot instead of failing.
    let value = storage.get_or_insert_with::<u64>("key", || 7);
    assert_eq!(*value, 7);
}

#[test]
fn storage_get_or_insert_runs_init_once() {
    let mut storage = ThreadStorage::new();
    let mut calls = 0;
    storage.get_or_insert_with::<Vec<String>>("cache", || {
        calls += 1;
        Vec::new()
    });
    storage
        .get_or_insert_with::<Vec<String>>("cache", || {
            calls += 1;
            Vec::new()
        })
        .push("conn".to_string());
    assert_eq!(calls, 1);
    assert_eq!(storage.get::<Vec<String>>("cache").unwrap().len(), 1);
}

#[test]
fn storage_remove() {
    let mut storage = ThreadStorage::new();
    storage.insert("gone", 1u8);
    assert!(storage.remove("gone"));
    assert!(!storage.remove("gone"));
    assert!(storage.is_empty());
}

#[test]
fn context_deadline_helpers() {
    let mut storage = ThreadStorage::new();
    let ctx = EventContext::for_sync(&mut storage);
    assert_eq!(ctx.remaining(), None);
    assert!(!ctx.deadline_exceeded());

    let mut storage = ThreadStorage::new();
    let ctx = EventContext::for_sync(&mut storage)
        .with_deadline(Instant::now() + Duration::from_secs(60));
    assert!(ctx.remaining().unwrap() > Duration::from_secs(50));
    assert!(!ctx.deadline_exceeded());

    let mut storage = ThreadStorage::new();
    let ctx = EventContext::for_sync(&mut storage).with_deadline(Instant::now());
    assert!(ctx.deadline_exceeded());
    assert_eq!(ctx.remaining(), Some(Duration::ZERO));
}

#[test]
fn worker_context_records_alive() {
    let alive = AliveSignal::new();
    let mut storage = ThreadStorage::new();
    let ctx = EventContext::for_worker(&mut storage, &alive);
    assert_eq!(ctx.process_id, Some(std::process::id()));

    ctx.send_alive("crunching block 3");
    let record = alive.take().unwrap();
    assert_eq!(record.status.as_deref(), Some("crunching block 3"));
    // Taking drains the slot.
    assert!(alive.take().is_none());
}

#[test]
fn alive_keeps_latest_record() {
    let alive = AliveSignal::new();
    alive.record(Some("step 1".into()));
    alive.record(Some("step 2".into()));
    assert_eq!(alive.take().unwrap().status.as_deref(), Some("step 2"));
}

#[test]
fn sync_context_send_alive_is_noop() {
    let mut storage = ThreadStorage::new();
    let ctx = EventContext::for_sync(&mut storage);
    // No worker link; must not panic.
    ctx.send_alive("ignored");
}
