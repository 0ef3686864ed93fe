//! Id-keyed store of finalized event results.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use corebus_protocol::EventResult;
use tracing::trace;

#[derive(Default)]
struct StoreState {
    /// Events published but not yet finalized.
    pending: HashSet<String>,
    /// Finalized results awaiting retrieval. Not a log: retrieval removes.
    results: HashMap<String, EventResult>,
    shutdown: bool,
}

/// Mutex-plus-condvar store backing `get_results` and `join`.
///
/// Publish registers an id as pending, finalization moves it to the result
/// map and wakes waiters, and retrieval drains what it returns. Shutdown
/// wakes every waiter so blocked callers observe whatever is finalized.
#[derive(Default)]
pub(crate) struct ResultStore {
    state: Mutex<StoreState>,
    cond: Condvar,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `event_id` has been accepted and will eventually
    /// finalize.
    pub fn register_pending(&self, event_id: &str) {
        let mut state = self.lock();
        state.pending.insert(event_id.to_string());
    }

    /// Finalize one event. Only pending ids are stored, which makes
    /// finalization exactly-once and keeps internal sentinels out of the
    /// result map.
    pub fn finalize(&self, result: EventResult) {
        let mut state = self.lock();
        if !state.pending.remove(&result.event_id) {
            return;
        }
        trace!(event_id = %result.event_id, success = result.success, "result finalized");
        state.results.insert(result.event_id.clone(), result);
        self.cond.notify_all();
    }

    /// Retrieve (and remove) results for `event_ids`. With `join_before`,
    /// blocks until every requested id has finalized or the store is shut
    /// down; ids that were never registered do not block.
    pub fn take(&self, event_ids: &[String], join_before: bool) -> HashMap<String, EventResult> {
        let mut state = self.lock();
        if join_before {
            while !state.shutdown && event_ids.iter().any(|id| state.pending.contains(id)) {
                state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        }
        let mut taken = HashMap::new();
        for id in event_ids {
            if let Some(result) = state.results.remove(id) {
                taken.insert(id.clone(), result);
            }
        }
        taken
    }

    /// Retrieve (and remove) everything currently finalized.
    pub fn take_all(&self) -> HashMap<String, EventResult> {
        let mut state = self.lock();
        std::mem::take(&mut state.results)
    }

    /// Block until no event is pending, or the store shuts down.
    pub fn join(&self) {
        let mut state = self.lock();
        while !state.shutdown && !state.pending.is_empty() {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wake every waiter and stop future waits from blocking.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
#[path = "results.test.rs"]
mod tests;
