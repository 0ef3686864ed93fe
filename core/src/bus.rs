//! The public bus façade: publish, retrieve, join, shut down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use corebus_protocol::EVENT_TYPE_SHUTDOWN;
use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::EventResult;
use corebus_protocol::ExecMode;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::config::EventBusConfig;
use crate::handler::EventHandler;
use crate::handler::ThreadStorage;
use crate::process_pool::ProcessPool;
use crate::progress;
use crate::registry::HandlerRegistry;
use crate::results::ResultStore;
use crate::thread_pool::PoolContext;
use crate::thread_pool::ThreadPool;
use crate::thread_pool::execute_local;
use crate::thread_pool::queue::EventQueue;

thread_local! {
    /// Storage for sync-mode execution: each publishing thread gets its
    /// own, satisfying the same isolation as a pool thread's storage.
    static SYNC_STORAGE: RefCell<ThreadStorage> = RefCell::new(ThreadStorage::new());
}

/// Single coordinator for tiered event execution.
///
/// The bus owns the worker-thread pool, the worker-process pool, and the
/// result store. It is safe to publish from many threads concurrently;
/// hold it in an `Arc` to share.
pub struct EventBus {
    config: EventBusConfig,
    registry: &'static HandlerRegistry,
    results: Arc<ResultStore>,
    queue: Arc<EventQueue>,
    thread_pool: ThreadPool,
    process_pool: Arc<ProcessPool>,
    shutdown: AtomicBool,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> io::Result<Self> {
        let registry = HandlerRegistry::global();
        let results = Arc::new(ResultStore::new());
        let queue = Arc::new(EventQueue::new());
        let process_pool = Arc::new(ProcessPool::new(&config)?);
        let ctx = Arc::new(PoolContext {
            registry,
            results: Arc::clone(&results),
            queue: Arc::clone(&queue),
            process_pool: Arc::clone(&process_pool),
        });
        let thread_pool = ThreadPool::start(config.thread_pool_size.max(1), ctx)?;
        info!(
            thread_pool_size = config.thread_pool_size,
            process_pool_max = config.process_pool_max,
            "event bus started"
        );
        Ok(Self {
            config,
            registry,
            results,
            queue,
            thread_pool,
            process_pool,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> io::Result<Self> {
        Self::new(EventBusConfig::default())
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Register `H` for `event_type` on the process-global registry.
    pub fn register_event_type<H>(&self, event_type: &str)
    where
        H: EventHandler + Default + 'static,
    {
        self.registry.register::<H>(event_type);
    }

    /// Register with a custom constructor.
    pub fn register_event_type_with<H, F>(&self, event_type: &str, factory: F)
    where
        H: EventHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry.register_with::<H, F>(event_type, factory);
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.registry.is_registered(event_type)
    }

    pub fn registered_event_types(&self) -> Vec<String> {
        self.registry.registered_event_types()
    }

    /// Build an event carrying this bus's configured default timeout and
    /// retry budget.
    pub fn event(&self, event_type: impl Into<String>, data: Value) -> Event {
        Event::new(event_type, data)
            .with_timeout_secs(self.config.default_timeout_secs)
            .with_max_retries(self.config.default_max_retries)
    }

    /// Accept one event: validate, resolve the execution mode, notify the
    /// tracker, and route. Returns the event id.
    pub fn publish(&self, mut event: Event) -> Result<String, EventError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EventError::ShutdownInProgress);
        }
        event.validate()?;

        let mode = event
            .exec_mode
            .or_else(|| self.registry.preferred_exec_mode(&event.event_type))
            .unwrap_or(ExecMode::Thread);
        event.exec_mode = Some(mode);
        if mode == ExecMode::Corelet && event.handler_locator.is_none() {
            // Absence is tolerated: the worker may have the type
            // registered even when this side does not.
            event.handler_locator = self.registry.locator(&event.event_type).ok();
        }

        let event_id = event.event_id.clone();
        debug!(
            event_id,
            event_type = %event.event_type,
            mode = %mode,
            priority = event.priority,
            "event published"
        );
        progress::notify_published(&event);
        self.results.register_pending(&event_id);

        match mode {
            ExecMode::Sync => self.execute_sync(&event),
            _ => {
                self.queue.push(event, 1);
            }
        }
        Ok(event_id)
    }

    /// Inline execution on the caller's thread, retries included. The
    /// result is stored before this returns.
    fn execute_sync(&self, event: &Event) {
        SYNC_STORAGE.with(|cell| {
            let storage = &mut cell.borrow_mut();
            let mut attempt: u32 = 1;
            loop {
                progress::notify_started(event);
                match execute_local(self.registry, storage, None, event) {
                    Ok(data) => {
                        self.results
                            .finalize(EventResult::ok(event.event_id.clone(), data, attempt));
                        progress::notify_completed(event, true);
                        return;
                    }
                    Err(error) if error.is_retryable() && attempt <= event.max_retries => {
                        attempt += 1;
                    }
                    Err(error) => {
                        self.results
                            .finalize(EventResult::failed(event.event_id.clone(), error, attempt));
                        progress::notify_completed(event, false);
                        return;
                    }
                }
            }
        });
    }

    /// Retrieve finalized results, removing them from the store.
    ///
    /// With ids and `join_before`, blocks until every requested id is
    /// finalized or the bus shuts down. Without ids, `join_before` waits
    /// for everything outstanding, then drains the store.
    pub fn get_results(
        &self,
        event_ids: Option<&[String]>,
        join_before: bool,
    ) -> HashMap<String, EventResult> {
        match event_ids {
            Some(ids) => self.results.take(ids, join_before),
            None => {
                if join_before {
                    self.results.join();
                }
                self.results.take_all()
            }
        }
    }

    /// Block until every currently-published event has finalized.
    pub fn join(&self) {
        self.results.join();
    }

    /// Live worker processes owned by the corelet pool.
    pub fn worker_process_count(&self) -> usize {
        self.process_pool.worker_count()
    }

    /// Pids of the live worker processes.
    pub fn worker_process_ids(&self) -> Vec<u32> {
        self.process_pool.worker_pids()
    }

    /// Stop accepting publishes, drain the thread pool, and tear down
    /// every worker process. Un-retrieved results stay available to
    /// non-blocking `get_results` calls but are not guaranteed delivery.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("event bus shutting down");

        // Corelet teardown first: queued and in-flight corelet round
        // trips fail fast instead of holding the drain to their timeouts.
        self.process_pool.shutdown();

        // Sentinels sort below all queued work, so the pool drains before
        // it stops.
        for _ in 0..self.thread_pool.size() {
            let sentinel = Event::new(EVENT_TYPE_SHUTDOWN, Value::Null)
                .with_exec_mode(ExecMode::Thread)
                .with_priority(0);
            self.queue.push(sentinel, 1);
        }
        self.thread_pool.join_all();
        self.queue.close();

        // Anything still queued (a publish that raced the sentinels)
        // finalizes as rejected.
        while let Some(item) = self.queue.pop() {
            if item.event.event_type == EVENT_TYPE_SHUTDOWN {
                continue;
            }
            self.results.finalize(EventResult::failed(
                item.event.event_id.clone(),
                EventError::ShutdownInProgress,
                item.attempt,
            ));
            progress::notify_completed(&item.event, false);
        }

        self.results.shutdown();
        info!("event bus shut down");
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "bus.test.rs"]
mod tests;
