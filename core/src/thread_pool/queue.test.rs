use std::sync::Arc;
use std::thread;
use std::time::Duration;

use corebus_protocol::Event;
use pretty_assertions::assert_eq;
use serde_json::Value;

use super::*;

fn event(priority: u8) -> Event {
    Event::new(format!("p{priority}"), Value::Null).with_priority(priority)
}

#[test]
fn fifo_within_priority() {
    let queue = EventQueue::new();
    queue.push(Event::new("first", Value::Null), 1);
    queue.push(Event::new("second", Value::Null), 1);
    queue.push(Event::new("third", Value::Null), 1);

    assert_eq!(queue.pop().unwrap().event.event_type, "first");
    assert_eq!(queue.pop().unwrap().event.event_type, "second");
    assert_eq!(queue.pop().unwrap().event.event_type, "third");
}

#[test]
fn higher_priority_first() {
    let queue = EventQueue::new();
    queue.push(event(1), 1);
    queue.push(event(9), 1);
    queue.push(event(5), 1);

    assert_eq!(queue.pop().unwrap().event.priority, 9);
    assert_eq!(queue.pop().unwrap().event.priority, 5);
    assert_eq!(queue.pop().unwrap().event.priority, 1);
}

#[test]
fn sequences_are_monotonic() {
    let queue = EventQueue::new();
    let a = queue.push(event(5), 1);
    let b = queue.push(event(5), 1);
    assert!(b > a);
}

#[test]
fn attempt_carried_through() {
    let queue = EventQueue::new();
    queue.push(event(5), 3);
    assert_eq!(queue.pop().unwrap().attempt, 3);
}

#[test]
fn pop_blocks_until_push() {
    let queue = Arc::new(EventQueue::new());
    let popper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop().map(|item| item.event.event_type))
    };
    thread::sleep(Duration::from_millis(50));
    queue.push(Event::new("late", Value::Null), 1);
    assert_eq!(popper.join().unwrap().as_deref(), Some("late"));
}

#[test]
fn close_drains_then_ends() {
    let queue = EventQueue::new();
    queue.push(event(5), 1);
    queue.close();
    assert!(queue.pop().is_some());
    assert!(queue.pop().is_none());
}

#[test]
fn close_wakes_blocked_poppers() {
    let queue = Arc::new(EventQueue::new());
    let popper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop().is_none())
    };
    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert!(popper.join().unwrap());
}

#[test]
fn len_reports_queued() {
    let queue = EventQueue::new();
    assert_eq!(queue.len(), 0);
    queue.push(event(5), 1);
    assert_eq!(queue.len(), 1);
}
