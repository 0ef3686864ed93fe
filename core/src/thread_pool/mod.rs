//! Fixed-size worker-thread pool draining the priority queue.
//!
//! Every queued execution mode flows through here: `thread` and `cmd`
//! events run on the dequeueing thread itself, and `corelet` events use
//! the dequeueing thread to drive the worker-process round trip. That
//! keeps priority ordering, the retry policy, and result finalization
//! identical across modes.

pub(crate) mod queue;

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use corebus_protocol::EVENT_TYPE_CMD_EXECUTION;
use corebus_protocol::EVENT_TYPE_SHUTDOWN;
use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::EventResult;
use corebus_protocol::ExecMode;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::handler::EventContext;
use crate::handler::EventHandler;
use crate::handler::ThreadStorage;
use crate::process_pool::ProcessPool;
use crate::progress;
use crate::registry::HandlerRegistry;
use crate::results::ResultStore;
use crate::thread_pool::queue::EventQueue;
use crate::thread_pool::queue::QueuedEvent;

/// Storage key under which each thread keeps its handler cache.
const HANDLER_CACHE_KEY: &str = "__corebus_handler_cache";

type HandlerCache = HashMap<String, Arc<dyn EventHandler>>;

/// Everything a pool worker needs to process one queue item.
pub(crate) struct PoolContext {
    pub registry: &'static HandlerRegistry,
    pub results: Arc<ResultStore>,
    pub queue: Arc<EventQueue>,
    pub process_pool: Arc<ProcessPool>,
}

/// The running pool; holds the thread handles for the shutdown join.
pub(crate) struct ThreadPool {
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    size: usize,
}

impl ThreadPool {
    pub fn start(size: usize, ctx: Arc<PoolContext>) -> io::Result<Self> {
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let ctx = Arc::clone(&ctx);
            let handle = thread::Builder::new()
                .name(format!("corebus-worker-{index}"))
                .spawn(move || worker_loop(&ctx))?;
            handles.push(handle);
        }
        Ok(Self {
            handles: Mutex::new(handles),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for every worker thread to exit. The caller is responsible for
    /// making them stop (shutdown sentinels plus closing the queue).
    pub fn join_all(&self) {
        let handles = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread exited via panic");
            }
        }
    }
}

fn worker_loop(ctx: &PoolContext) {
    let mut storage = ThreadStorage::new();
    let thread_id = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", thread::current().id()));
    debug!(thread_id, "pool worker started");
    while let Some(item) = ctx.queue.pop() {
        if item.event.event_type == EVENT_TYPE_SHUTDOWN {
            // Finalizes only if this was a published event rather than a
            // drain sentinel; either way this worker stops.
            ctx.results
                .finalize(EventResult::ok(item.event.event_id.clone(), None, item.attempt));
            debug!(thread_id, "pool worker stopping");
            break;
        }
        process_item(ctx, &mut storage, &thread_id, item);
    }
}

fn process_item(ctx: &PoolContext, storage: &mut ThreadStorage, thread_id: &str, item: QueuedEvent) {
    let event = &item.event;
    progress::notify_started(event);

    let outcome = match event.exec_mode {
        Some(ExecMode::Corelet) => ctx.process_pool.execute(event),
        _ => execute_local(ctx.registry, storage, Some(thread_id.to_string()), event),
    };

    match outcome {
        Ok(data) => {
            ctx.results
                .finalize(EventResult::ok(event.event_id.clone(), data, item.attempt));
            progress::notify_completed(event, true);
        }
        Err(error) if error.is_retryable() && item.attempt <= event.max_retries => {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                attempt = item.attempt,
                error = %error,
                "attempt failed, re-enqueueing"
            );
            ctx.queue.push(item.event, item.attempt + 1);
        }
        Err(error) => {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                attempts = item.attempt,
                error = %error,
                "event finalized as failure"
            );
            ctx.results
                .finalize(EventResult::failed(event.event_id.clone(), error, item.attempt));
            progress::notify_completed(event, false);
        }
    }
}

/// Run one attempt on the current thread: resolve the handler (through the
/// per-thread cache), execute under the cooperative timeout guard, and
/// normalize panics into execution errors.
pub(crate) fn execute_local(
    registry: &HandlerRegistry,
    storage: &mut ThreadStorage,
    thread_id: Option<String>,
    event: &Event,
) -> Result<Option<Value>, EventError> {
    let handler = cached_handler(registry, storage, resolution_type(event))?;

    let started = Instant::now();
    let budget = Duration::from_secs(event.timeout_secs);
    let mut ctx = match thread_id {
        Some(id) => EventContext::for_thread(storage, id),
        None => EventContext::for_sync(storage),
    }
    .with_deadline(started + budget);

    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(event, &mut ctx)));
    let outcome = match outcome {
        Ok(result) => result,
        Err(panic) => Err(EventError::execution(format!(
            "handler panicked: {}",
            panic_message(&panic)
        ))),
    };

    // The guard is cooperative: overrun is observed at handler return.
    if started.elapsed() > budget {
        return Err(EventError::Timeout {
            timeout_secs: event.timeout_secs,
        });
    }
    outcome
}

/// Event type used for handler resolution. `cmd` events resolve to the
/// internal shell-command handler regardless of their own type.
fn resolution_type(event: &Event) -> &str {
    match event.exec_mode {
        Some(ExecMode::Cmd) => EVENT_TYPE_CMD_EXECUTION,
        _ => &event.event_type,
    }
}

fn cached_handler(
    registry: &HandlerRegistry,
    storage: &mut ThreadStorage,
    event_type: &str,
) -> Result<Arc<dyn EventHandler>, EventError> {
    if let Some(cache) = storage.get::<HandlerCache>(HANDLER_CACHE_KEY) {
        if let Some(handler) = cache.get(event_type) {
            return Ok(Arc::clone(handler));
        }
    }
    let handler = registry.create(event_type)?;
    let cache = storage.get_or_insert_with::<HandlerCache>(HANDLER_CACHE_KEY, HashMap::new);
    cache.insert(event_type.to_string(), Arc::clone(&handler));
    Ok(handler)
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "pool.test.rs"]
mod tests;
