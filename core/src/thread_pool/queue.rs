//! Priority queue feeding the worker-thread pool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering as AtomicOrdering;

use corebus_protocol::Event;

/// One queued execution attempt.
pub(crate) struct QueuedEvent {
    pub event: Event,
    /// 1 for the first execution, incremented on each re-enqueue.
    pub attempt: u32,
    /// Enqueue-time tie-breaker: FIFO within a priority level.
    pub sequence: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.priority == other.event.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (earlier
        // enqueue) first.
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedEvent>,
    closed: bool,
}

/// Blocking priority queue shared by the bus and the pool workers.
pub(crate) struct EventQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    sequence: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cond: Condvar::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Enqueue one attempt, assigning its publish sequence. Returns the
    /// assigned sequence.
    pub fn push(&self, event: Event, attempt: u32) -> u64 {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.push(QueuedEvent {
            event,
            attempt,
            sequence,
        });
        self.cond.notify_one();
        sequence
    }

    /// Dequeue the next attempt, blocking while the queue is open and
    /// empty. Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<QueuedEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = inner.heap.pop() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Stop blocking poppers once the remaining items are drained.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.len()
    }
}

#[cfg(test)]
#[path = "queue.test.rs"]
mod tests;
