//! Pool of long-lived worker processes for corelet execution.
//!
//! Workers are acquired for one event at a time and returned to the idle
//! set afterwards (session-based reuse). Each worker is paired with a
//! health monitor thread; the pool reaps declared-dead workers lazily on
//! its next access, while in-flight failures surface to the thread
//! driving the dispatch through the task pipe itself.

mod descriptor;
mod monitor;

use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use corebus_protocol::CodecError;
use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::TaskRecord;
use corebus_protocol::recv_record;
use corebus_protocol::send_record;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::EventBusConfig;
use crate::process_pool::descriptor::WorkerProcess;
use crate::process_pool::descriptor::spawn_worker;
use crate::process_pool::monitor::MonitorConfig;
use crate::process_pool::monitor::MonitorEvent;
use crate::process_pool::monitor::MonitorHandle;
use crate::process_pool::monitor::spawn_monitor;

/// Slack added to an event's timeout for the task-pipe read, covering
/// serialization and scheduling overhead.
const TASK_TIMEOUT_GRACE_SECS: u64 = 1;

/// Bound on the registration round trip; handler construction is cheap.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

struct PoolWorker {
    process: WorkerProcess,
    monitor: Option<MonitorHandle>,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<PoolWorker>,
    /// Spawns in progress outside the lock, counted against the maximum.
    spawning: usize,
}

/// Exclusive use of one worker for one dispatch. Holding the task pipe by
/// value is what makes the exclusivity.
struct WorkerLease {
    worker_id: String,
    event_type: String,
    task_pipe: UnixStream,
    needs_registration: bool,
}

pub(crate) struct ProcessPool {
    program: PathBuf,
    extra_args: Vec<String>,
    max_workers: usize,
    idle_timeout_secs: u64,
    monitor_config: MonitorConfigSource,
    shutdown_grace: Duration,
    socket_dir: TempDir,
    state: Mutex<PoolState>,
    available: Condvar,
    events_tx: Sender<MonitorEvent>,
    events_rx: Receiver<MonitorEvent>,
    shutdown: AtomicBool,
}

/// The per-monitor configuration, kept here so each spawn can mint a
/// [`MonitorConfig`].
struct MonitorConfigSource {
    interval: Duration,
    grace_misses: u32,
    shutdown_grace: Duration,
}

impl MonitorConfigSource {
    fn mint(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.interval,
            grace_misses: self.grace_misses,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

impl ProcessPool {
    pub fn new(config: &EventBusConfig) -> io::Result<Self> {
        let program = match &config.worker_program {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };
        let socket_dir = tempfile::Builder::new().prefix("corebus-").tempdir()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            program,
            extra_args: config.worker_args.clone(),
            max_workers: config.process_pool_max.max(1),
            idle_timeout_secs: config.process_idle_timeout_secs,
            monitor_config: MonitorConfigSource {
                interval: Duration::from_secs(config.health_interval_secs.max(1)),
                grace_misses: config.health_grace_misses,
                shutdown_grace: Duration::from_secs(config.shutdown_grace_secs.max(1)),
            },
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs.max(1)),
            socket_dir,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            events_tx,
            events_rx,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Execute one corelet event on a pooled worker. Blocks the calling
    /// thread for the whole round trip; retries are the caller's policy.
    pub fn execute(&self, event: &Event) -> Result<Option<Value>, EventError> {
        let lease = self.acquire(event)?;
        self.dispatch(lease, event)
    }

    /// Number of live worker processes, for introspection and tests.
    pub fn worker_count(&self) -> usize {
        let mut state = self.lock_state();
        self.reap_dead(&mut state);
        state.workers.len()
    }

    /// Pids of the live worker processes.
    pub fn worker_pids(&self) -> Vec<u32> {
        let mut state = self.lock_state();
        self.reap_dead(&mut state);
        state.workers.iter().map(|w| w.process.pid).collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self, event: &Event) -> Result<WorkerLease, EventError> {
        let mut state = self.lock_state();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(EventError::ShutdownInProgress);
            }
            self.reap_dead(&mut state);

            if let Some(worker) = state
                .workers
                .iter_mut()
                .find(|w| !w.process.in_use && !w.process.dead.load(Ordering::Acquire))
            {
                if let Some(task_pipe) = worker.process.task_pipe.take() {
                    worker.process.in_use = true;
                    worker.process.assigned_event_id = Some(event.event_id.clone());
                    let needs_registration =
                        !worker.process.registered_types.contains(&event.event_type);
                    debug!(
                        worker_id = %worker.process.worker_id,
                        event_id = %event.event_id,
                        "reusing idle worker"
                    );
                    return Ok(WorkerLease {
                        worker_id: worker.process.worker_id.clone(),
                        event_type: event.event_type.clone(),
                        task_pipe,
                        needs_registration,
                    });
                }
            }

            if state.workers.len() + state.spawning < self.max_workers {
                state.spawning += 1;
                drop(state);
                // A spawn failure surfaces to the caller; its retry policy
                // gets a fresh attempt at a fresh worker.
                return self.spawn_for(event);
            }

            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Spawn a worker, register it with the pool, and lease it to the
    /// caller. Runs without the pool lock; `spawning` holds the slot.
    fn spawn_for(&self, event: &Event) -> Result<WorkerLease, EventError> {
        let spawned = spawn_worker(
            &self.program,
            &self.extra_args,
            self.socket_dir.path(),
            self.idle_timeout_secs,
        );
        let mut state = self.lock_state();
        state.spawning -= 1;
        let spawned = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                self.available.notify_one();
                return Err(EventError::execution(format!("failed to start worker: {e}")));
            }
        };

        let dead = Arc::new(AtomicBool::new(false));
        let monitor = spawn_monitor(
            spawned.worker_id.clone(),
            spawned.health_pipe,
            self.monitor_config.mint(),
            Arc::clone(&dead),
            self.events_tx.clone(),
        );
        let mut child = spawned.child;
        let monitor = match monitor {
            Ok(monitor) => monitor,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                self.available.notify_one();
                return Err(EventError::execution(format!(
                    "failed to start health monitor: {e}"
                )));
            }
        };

        if self.shutdown.load(Ordering::Acquire) {
            // Shutdown raced the spawn; do not leak the process.
            let _ = child.kill();
            let _ = child.wait();
            return Err(EventError::ShutdownInProgress);
        }

        state.workers.push(PoolWorker {
            process: WorkerProcess {
                worker_id: spawned.worker_id.clone(),
                pid: spawned.pid,
                child,
                task_pipe: None,
                in_use: true,
                last_activity: Instant::now(),
                assigned_event_id: Some(event.event_id.clone()),
                registered_types: Default::default(),
                dead,
            },
            monitor: Some(monitor),
        });

        Ok(WorkerLease {
            worker_id: spawned.worker_id,
            event_type: event.event_type.clone(),
            task_pipe: spawned.task_pipe,
            needs_registration: true,
        })
    }

    fn dispatch(&self, mut lease: WorkerLease, event: &Event) -> Result<Option<Value>, EventError> {
        if lease.needs_registration {
            if let Some(locator) = &event.handler_locator {
                if send_record(
                    &mut lease.task_pipe,
                    &TaskRecord::Register {
                        locator: locator.clone(),
                    },
                )
                .is_err()
                {
                    let worker_id = lease.worker_id.clone();
                    self.destroy(lease);
                    return Err(EventError::WorkerDied { worker_id });
                }
                if lease
                    .task_pipe
                    .set_read_timeout(Some(REGISTRATION_TIMEOUT))
                    .is_err()
                {
                    let worker_id = lease.worker_id.clone();
                    self.destroy(lease);
                    return Err(EventError::WorkerDied { worker_id });
                }
                match recv_record::<TaskRecord>(&mut lease.task_pipe) {
                    Ok(TaskRecord::Result { success: true, .. }) => {}
                    Ok(TaskRecord::Result { success: false, error, .. }) => {
                        // The worker is healthy, it just cannot serve this
                        // type. Keep it for other work.
                        let err = error
                            .unwrap_or_else(|| EventError::no_handler(lease.event_type.clone()));
                        self.release(lease, false);
                        return Err(err);
                    }
                    Ok(_) | Err(_) => {
                        self.destroy(lease);
                        return Err(EventError::execution("worker registration failed"));
                    }
                }
            }
            // Without a locator the worker resolves the handler from its
            // own registry on the first task of this type.
        }

        if send_record(&mut lease.task_pipe, &TaskRecord::Task { event: event.clone() }).is_err() {
            let worker_id = lease.worker_id.clone();
            self.destroy(lease);
            return Err(EventError::WorkerDied { worker_id });
        }

        let read_budget = Duration::from_secs(event.timeout_secs + TASK_TIMEOUT_GRACE_SECS);
        if lease.task_pipe.set_read_timeout(Some(read_budget)).is_err() {
            let worker_id = lease.worker_id.clone();
            self.destroy(lease);
            return Err(EventError::WorkerDied { worker_id });
        }
        match recv_record::<TaskRecord>(&mut lease.task_pipe) {
            Ok(TaskRecord::Result {
                success,
                data,
                error,
                ..
            }) => {
                self.release(lease, true);
                if success {
                    Ok(data)
                } else {
                    Err(error.unwrap_or_else(|| {
                        EventError::execution("worker reported failure without detail")
                    }))
                }
            }
            Ok(record) => {
                warn!(worker_id = %lease.worker_id, ?record, "unexpected record on task pipe");
                self.destroy(lease);
                Err(EventError::execution("unexpected record on task pipe"))
            }
            Err(CodecError::Timeout) => {
                // Authoritative timeout: the worker may be wedged inside
                // the handler, so it is destroyed rather than reused.
                warn!(
                    worker_id = %lease.worker_id,
                    event_id = %event.event_id,
                    timeout_secs = event.timeout_secs,
                    "task timed out, destroying worker"
                );
                self.destroy(lease);
                Err(EventError::Timeout {
                    timeout_secs: event.timeout_secs,
                })
            }
            Err(_) => {
                let worker_id = lease.worker_id.clone();
                self.destroy(lease);
                Err(EventError::WorkerDied { worker_id })
            }
        }
    }

    /// Return a leased worker to the idle set.
    fn release(&self, lease: WorkerLease, mark_registered: bool) {
        let mut state = self.lock_state();
        if let Some(worker) = state
            .workers
            .iter_mut()
            .find(|w| w.process.worker_id == lease.worker_id)
        {
            worker.process.task_pipe = Some(lease.task_pipe);
            worker.process.in_use = false;
            worker.process.last_activity = Instant::now();
            worker.process.assigned_event_id = None;
            if mark_registered {
                worker.process.registered_types.insert(lease.event_type);
            }
        }
        // If the worker was reaped while leased, dropping the pipe here is
        // all the cleanup left to do.
        self.available.notify_one();
    }

    /// Remove a leased worker from the pool and kill its process.
    fn destroy(&self, lease: WorkerLease) {
        let mut state = self.lock_state();
        if let Some(pos) = state
            .workers
            .iter()
            .position(|w| w.process.worker_id == lease.worker_id)
        {
            let mut worker = state.workers.remove(pos);
            worker.process.kill();
            // Dropping the monitor handle disconnects its channel; the
            // monitor thread exits on its next tick.
            info!(worker_id = %lease.worker_id, "worker destroyed");
        }
        drop(lease);
        self.available.notify_one();
    }

    /// Drain monitor notifications, killing and removing flagged workers.
    fn reap_dead(&self, state: &mut PoolState) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                MonitorEvent::Dead { worker_id } => {
                    if let Some(pos) = state
                        .workers
                        .iter()
                        .position(|w| w.process.worker_id == worker_id)
                    {
                        let mut worker = state.workers.remove(pos);
                        worker.process.kill();
                        warn!(
                            worker_id,
                            idle_secs = worker.process.last_activity.elapsed().as_secs(),
                            assigned_event = ?worker.process.assigned_event_id,
                            "reaped dead worker"
                        );
                        self.available.notify_all();
                    }
                }
                MonitorEvent::ShutdownComplete { worker_id } => {
                    debug!(worker_id, "late shutdown acknowledgement");
                }
            }
        }
    }

    /// Tear down every worker: graceful shutdown records first, then the
    /// health handshake, then the kill for anything still running.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.available.notify_all();

        let mut workers = {
            let mut state = self.lock_state();
            std::mem::take(&mut state.workers)
        };
        for worker in &mut workers {
            if let Some(pipe) = worker.process.task_pipe.as_mut() {
                let _ = send_record(pipe, &TaskRecord::Shutdown);
            }
            if let Some(monitor) = &worker.monitor {
                monitor.request_shutdown();
            }
        }
        for worker in &mut workers {
            if let Some(monitor) = worker.monitor.take() {
                monitor.join();
            }
            worker.process.wait_or_kill(self.shutdown_grace);
        }
        info!(workers = workers.len(), "process pool shut down");
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
