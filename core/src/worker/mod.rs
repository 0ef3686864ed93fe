//! Worker-process entrypoint for corelet execution.
//!
//! A worker binary parses the spawn-contract arguments, registers the
//! same handlers as the publishing side, and calls [`run`]. The main loop
//! owns the task pipe; a health thread owns the health pipe and answers
//! pings with the latest alive evidence.

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixStream;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use corebus_protocol::CodecError;
use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::HealthRecord;
use corebus_protocol::TaskRecord;
use corebus_protocol::recv_record;
use corebus_protocol::send_record;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::handler::AliveSignal;
use crate::handler::EventContext;
use crate::handler::EventHandler;
use crate::handler::ThreadStorage;
use crate::registry::HandlerRegistry;
use crate::thread_pool::panic_message;

/// Poll tick for the task pipe; bounds the latency of stop-flag checks
/// and idle accounting.
const POLL_TICK: Duration = Duration::from_millis(500);

/// Poll tick for the health pipe; bounds directive latency.
const HEALTH_TICK: Duration = Duration::from_millis(500);

/// Quiet pings after which the health thread self-reports death.
const QUIET_PING_LIMIT: u32 = 2;

/// Spawn-contract arguments, as passed by the pool.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub socket_path: PathBuf,
    /// The worker exits on its own after this much time without a task
    /// record.
    pub idle_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to pool socket: {0}")]
    Connect(io::Error),

    #[error("health thread could not be started: {0}")]
    HealthThread(io::Error),

    #[error("task pipe failure: {0}")]
    TaskPipe(#[from] CodecError),
}

/// Liveness bookkeeping shared between the main loop and the health
/// thread.
#[derive(Default)]
struct ActivityState {
    /// Last main-loop tick or record, as a monotonic instant.
    last_tick: Mutex<Option<Instant>>,
    /// Deadline of the in-flight handler, when one is executing.
    executing_until: Mutex<Option<Instant>>,
}

impl ActivityState {
    fn touch(&self) {
        let mut last = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Instant::now());
    }

    fn set_executing(&self, deadline: Instant) {
        let mut until = self
            .executing_until
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *until = Some(deadline);
    }

    fn clear_executing(&self) {
        let mut until = self
            .executing_until
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *until = None;
    }

    /// Whether the main loop counts as alive: it ticked recently, or it is
    /// inside a handler whose deadline has not yet expired. A handler past
    /// its deadline stops counting; the pool's task-read timeout is about
    /// to fire anyway.
    fn is_active(&self) -> bool {
        let executing = {
            let until = self
                .executing_until
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            until.is_some_and(|deadline| Instant::now() < deadline)
        };
        if executing {
            return true;
        }
        let last = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
        last.is_some_and(|tick| tick.elapsed() < POLL_TICK * 3)
    }
}

/// Requests from the main loop to the health thread, which owns the
/// health pipe.
enum HealthDirective {
    AnnounceDied,
    AnnounceShutdownComplete,
}

#[derive(Debug, Default)]
struct WorkerStats {
    events_processed: u64,
    errors_count: u64,
    handlers_loaded: u64,
}

/// Run the worker main loop until shutdown, idle timeout, or pipe loss.
///
/// Returns `Ok` on every graceful path; the caller maps errors to a
/// non-zero exit code.
pub fn run(options: WorkerOptions) -> Result<(), WorkerError> {
    let worker_id = options.worker_id.clone();
    info!(
        worker_id,
        pid = std::process::id(),
        socket = %options.socket_path.display(),
        "worker starting"
    );

    // Connection order is the contract: task pipe first, then health.
    let task_pipe = UnixStream::connect(&options.socket_path).map_err(WorkerError::Connect)?;
    let health_pipe = UnixStream::connect(&options.socket_path).map_err(WorkerError::Connect)?;

    let alive = Arc::new(AliveSignal::new());
    let activity = Arc::new(ActivityState::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (directives_tx, directives_rx) = crossbeam_channel::unbounded();

    let health_thread = {
        let worker_id = worker_id.clone();
        let alive = Arc::clone(&alive);
        let activity = Arc::clone(&activity);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("{worker_id}-health"))
            .spawn(move || {
                health_loop(&worker_id, health_pipe, &alive, &activity, &stop, &directives_rx);
            })
            .map_err(WorkerError::HealthThread)?
    };

    let stats = main_loop(
        &options,
        task_pipe,
        &alive,
        &activity,
        &stop,
        &directives_tx,
    )?;

    stop.store(true, Ordering::Release);
    drop(directives_tx);
    let _ = health_thread.join();

    info!(
        worker_id,
        events_processed = stats.events_processed,
        errors_count = stats.errors_count,
        handlers_loaded = stats.handlers_loaded,
        "worker stopped"
    );
    Ok(())
}

fn main_loop(
    options: &WorkerOptions,
    mut task_pipe: UnixStream,
    alive: &AliveSignal,
    activity: &ActivityState,
    stop: &AtomicBool,
    directives_tx: &Sender<HealthDirective>,
) -> Result<WorkerStats, WorkerError> {
    task_pipe
        .set_read_timeout(Some(POLL_TICK))
        .map_err(WorkerError::Connect)?;

    let registry = HandlerRegistry::global();
    let mut handlers: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();
    let mut storage = ThreadStorage::new();
    let mut stats = WorkerStats::default();
    let mut last_record = Instant::now();

    loop {
        activity.touch();
        if stop.load(Ordering::Acquire) {
            debug!(worker_id = %options.worker_id, "stop requested, leaving main loop");
            return Ok(stats);
        }
        if last_record.elapsed() >= options.idle_timeout {
            info!(
                worker_id = %options.worker_id,
                idle_secs = last_record.elapsed().as_secs(),
                "idle timeout reached, announcing death"
            );
            let _ = directives_tx.send(HealthDirective::AnnounceDied);
            return Ok(stats);
        }

        match recv_record::<TaskRecord>(&mut task_pipe) {
            Ok(TaskRecord::Register { locator }) => {
                last_record = Instant::now();
                let ack = match load_handler(registry, &mut handlers, &locator.event_type) {
                    Ok(_) => {
                        stats.handlers_loaded += 1;
                        debug!(
                            worker_id = %options.worker_id,
                            event_type = %locator.event_type,
                            handler = %locator.handler_name,
                            "handler registered"
                        );
                        TaskRecord::registration_ack(locator.event_type.clone())
                    }
                    Err(err) => {
                        warn!(
                            worker_id = %options.worker_id,
                            event_type = %locator.event_type,
                            error = %err,
                            "registration failed"
                        );
                        TaskRecord::Result {
                            event_id: locator.event_type.clone(),
                            success: false,
                            data: None,
                            error: Some(err),
                        }
                    }
                };
                send_record(&mut task_pipe, &ack)?;
            }
            Ok(TaskRecord::Task { event }) => {
                last_record = Instant::now();
                let result = execute_event(
                    registry,
                    &mut handlers,
                    &mut storage,
                    alive,
                    activity,
                    &event,
                    &mut stats,
                );
                send_record(&mut task_pipe, &result)?;
            }
            Ok(TaskRecord::Shutdown) => {
                debug!(worker_id = %options.worker_id, "shutdown requested");
                let _ = send_record(&mut task_pipe, &TaskRecord::ShutdownAck);
                let _ = directives_tx.send(HealthDirective::AnnounceShutdownComplete);
                return Ok(stats);
            }
            Ok(record) => {
                warn!(worker_id = %options.worker_id, ?record, "unexpected task record");
            }
            Err(CodecError::Timeout) => {}
            Err(CodecError::Closed) => {
                warn!(worker_id = %options.worker_id, "task pipe closed, exiting");
                return Ok(stats);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn execute_event(
    registry: &HandlerRegistry,
    handlers: &mut HashMap<String, Arc<dyn EventHandler>>,
    storage: &mut ThreadStorage,
    alive: &AliveSignal,
    activity: &ActivityState,
    event: &Event,
    stats: &mut WorkerStats,
) -> TaskRecord {
    let handler = match load_handler(registry, handlers, &event.event_type) {
        Ok(handler) => handler,
        Err(err) => {
            stats.errors_count += 1;
            return TaskRecord::Result {
                event_id: event.event_id.clone(),
                success: false,
                data: None,
                error: Some(err),
            };
        }
    };

    let deadline = Instant::now() + Duration::from_secs(event.timeout_secs);
    activity.set_executing(deadline);
    let mut ctx = EventContext::for_worker(storage, alive).with_deadline(deadline);
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(event, &mut ctx)));
    activity.clear_executing();
    activity.touch();

    let outcome: Result<Option<Value>, EventError> = match outcome {
        Ok(result) => result,
        Err(panic) => Err(EventError::execution(format!(
            "handler panicked: {}",
            panic_message(&panic)
        ))),
    };

    match outcome {
        Ok(data) => {
            stats.events_processed += 1;
            TaskRecord::Result {
                event_id: event.event_id.clone(),
                success: true,
                data,
                error: None,
            }
        }
        Err(err) => {
            stats.errors_count += 1;
            debug!(event_id = %event.event_id, error = %err, "handler failed");
            TaskRecord::Result {
                event_id: event.event_id.clone(),
                success: false,
                data: None,
                error: Some(err),
            }
        }
    }
}

fn load_handler(
    registry: &HandlerRegistry,
    handlers: &mut HashMap<String, Arc<dyn EventHandler>>,
    event_type: &str,
) -> Result<Arc<dyn EventHandler>, EventError> {
    if let Some(handler) = handlers.get(event_type) {
        return Ok(Arc::clone(handler));
    }
    let handler = registry.create(event_type)?;
    handlers.insert(event_type.to_string(), Arc::clone(&handler));
    Ok(handler)
}

fn health_loop(
    worker_id: &str,
    mut health_pipe: UnixStream,
    alive: &AliveSignal,
    activity: &ActivityState,
    stop: &AtomicBool,
    directives_rx: &Receiver<HealthDirective>,
) {
    if health_pipe.set_read_timeout(Some(HEALTH_TICK)).is_err() {
        return;
    }
    let mut quiet_pings: u32 = 0;
    loop {
        // Directives from the main loop win over pipe traffic.
        while let Ok(directive) = directives_rx.try_recv() {
            match directive {
                HealthDirective::AnnounceDied => {
                    let _ = send_record(
                        &mut health_pipe,
                        &HealthRecord::Died {
                            worker_id: worker_id.to_string(),
                        },
                    );
                    stop.store(true, Ordering::Release);
                    return;
                }
                HealthDirective::AnnounceShutdownComplete => {
                    let _ = send_record(
                        &mut health_pipe,
                        &HealthRecord::ShutdownComplete {
                            worker_id: worker_id.to_string(),
                        },
                    );
                    stop.store(true, Ordering::Release);
                    return;
                }
            }
        }
        if stop.load(Ordering::Acquire) {
            return;
        }

        match recv_record::<HealthRecord>(&mut health_pipe) {
            Ok(HealthRecord::Ping) => {
                let reply = if let Some(record) = alive.take() {
                    quiet_pings = 0;
                    HealthRecord::Pong {
                        last_alive: record.timestamp,
                        status: record.status,
                    }
                } else if activity.is_active() {
                    quiet_pings = 0;
                    HealthRecord::Pong {
                        last_alive: Utc::now(),
                        status: None,
                    }
                } else {
                    quiet_pings += 1;
                    if quiet_pings >= QUIET_PING_LIMIT {
                        error!(worker_id, "no activity across pings, self-reporting death");
                        let _ = send_record(
                            &mut health_pipe,
                            &HealthRecord::Died {
                                worker_id: worker_id.to_string(),
                            },
                        );
                        stop.store(true, Ordering::Release);
                        return;
                    }
                    // First quiet ping is graceful.
                    HealthRecord::Pong {
                        last_alive: Utc::now(),
                        status: None,
                    }
                };
                if send_record(&mut health_pipe, &reply).is_err() {
                    stop.store(true, Ordering::Release);
                    return;
                }
            }
            Ok(HealthRecord::Shutdown) => {
                let _ = send_record(
                    &mut health_pipe,
                    &HealthRecord::ShutdownComplete {
                        worker_id: worker_id.to_string(),
                    },
                );
                stop.store(true, Ordering::Release);
                return;
            }
            Ok(record) => {
                debug!(worker_id, ?record, "unexpected health record");
            }
            Err(CodecError::Timeout) => {}
            Err(_) => {
                // Parent gone; nothing to answer to.
                stop.store(true, Ordering::Release);
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "worker.test.rs"]
mod tests;
