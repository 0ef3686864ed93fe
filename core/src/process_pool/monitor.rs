//! Per-worker health monitoring.
//!
//! Each worker gets a dedicated monitor thread that pings on an interval
//! and interprets the reply. The monitor never touches the child process
//! itself; it flags the worker dead and notifies the pool, which reaps
//! the descriptor. An in-flight task surfaces its own failure through the
//! task pipe (EOF after the kill), so no result is written from here.

use std::io;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use corebus_protocol::CodecError;
use corebus_protocol::HealthRecord;
use corebus_protocol::recv_record;
use corebus_protocol::send_record;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use tracing::debug;
use tracing::trace;
use tracing::warn;

/// Notifications from a monitor to the pool.
pub(crate) enum MonitorEvent {
    Dead { worker_id: String },
    ShutdownComplete { worker_id: String },
}

/// Pool-side handle to a running monitor thread.
pub(crate) struct MonitorHandle {
    shutdown_tx: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the monitor to run the graceful shutdown handshake.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }
}

pub(crate) struct MonitorConfig {
    pub interval: Duration,
    pub grace_misses: u32,
    pub shutdown_grace: Duration,
}

pub(crate) fn spawn_monitor(
    worker_id: String,
    health_pipe: UnixStream,
    config: MonitorConfig,
    dead: Arc<AtomicBool>,
    events_tx: Sender<MonitorEvent>,
) -> io::Result<MonitorHandle> {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let name = format!("{worker_id}-monitor");
    let thread = thread::Builder::new().name(name).spawn(move || {
        monitor_loop(&worker_id, health_pipe, &config, &dead, &events_tx, &shutdown_rx);
    })?;
    Ok(MonitorHandle {
        shutdown_tx,
        thread,
    })
}

fn monitor_loop(
    worker_id: &str,
    mut health_pipe: UnixStream,
    config: &MonitorConfig,
    dead: &AtomicBool,
    events_tx: &Sender<MonitorEvent>,
    shutdown_rx: &Receiver<()>,
) {
    if health_pipe.set_read_timeout(Some(config.interval)).is_err() {
        declare_dead(worker_id, dead, events_tx);
        return;
    }
    let mut misses: u32 = 0;
    loop {
        // Pace the pings on the shutdown channel so a shutdown request
        // interrupts the wait instead of queueing behind it.
        match shutdown_rx.recv_timeout(config.interval) {
            Ok(()) => {
                shutdown_handshake(worker_id, &mut health_pipe, config, events_tx);
                return;
            }
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if send_record(&mut health_pipe, &HealthRecord::Ping).is_err() {
            declare_dead(worker_id, dead, events_tx);
            return;
        }
        match recv_record::<HealthRecord>(&mut health_pipe) {
            Ok(HealthRecord::Pong { last_alive, status }) => {
                misses = 0;
                trace!(worker_id, %last_alive, ?status, "pong");
            }
            Ok(HealthRecord::Alive { status }) => {
                // In-band progress counts as liveness evidence.
                misses = 0;
                debug!(worker_id, status, "alive");
            }
            Ok(HealthRecord::Died { .. }) => {
                debug!(worker_id, "worker announced its own death");
                declare_dead(worker_id, dead, events_tx);
                return;
            }
            Ok(HealthRecord::ShutdownComplete { .. }) => {
                let _ = events_tx.send(MonitorEvent::ShutdownComplete {
                    worker_id: worker_id.to_string(),
                });
                return;
            }
            Ok(_) => {}
            Err(CodecError::Timeout) => {
                misses += 1;
                if misses > config.grace_misses {
                    declare_dead(worker_id, dead, events_tx);
                    return;
                }
                // First miss is graceful: absorb transient scheduling
                // latency.
                warn!(worker_id, misses, "missed health probe");
            }
            Err(_) => {
                // EOF means the process is gone.
                declare_dead(worker_id, dead, events_tx);
                return;
            }
        }
    }
}

fn shutdown_handshake(
    worker_id: &str,
    health_pipe: &mut UnixStream,
    config: &MonitorConfig,
    events_tx: &Sender<MonitorEvent>,
) {
    if send_record(health_pipe, &HealthRecord::Shutdown).is_err() {
        return;
    }
    if health_pipe
        .set_read_timeout(Some(config.shutdown_grace))
        .is_err()
    {
        return;
    }
    // Drain stray pongs until the acknowledgement or the deadline.
    loop {
        match recv_record::<HealthRecord>(health_pipe) {
            Ok(HealthRecord::ShutdownComplete { .. }) => {
                debug!(worker_id, "worker acknowledged shutdown");
                let _ = events_tx.send(MonitorEvent::ShutdownComplete {
                    worker_id: worker_id.to_string(),
                });
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

fn declare_dead(worker_id: &str, dead: &AtomicBool, events_tx: &Sender<MonitorEvent>) {
    warn!(worker_id, "worker declared dead");
    dead.store(true, Ordering::Release);
    let _ = events_tx.send(MonitorEvent::Dead {
        worker_id: worker_id.to_string(),
    });
}
