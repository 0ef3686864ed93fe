//! Spawning and ownership of one worker process.

use std::collections::HashSet;
use std::io;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;
use tracing::info;
use tracing::warn;

/// How long a freshly spawned worker gets to connect its pipes.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub(crate) enum SpawnError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("worker '{0}' exited during startup")]
    EarlyExit(String),

    #[error("worker '{0}' did not connect within {1:?}")]
    ConnectTimeout(String, Duration),
}

/// A live worker as tracked by the pool.
///
/// The task pipe is taken out of the descriptor for the duration of a
/// dispatch, making in-flight exclusivity a matter of ownership rather
/// than discipline. The health pipe is handed to the monitor thread at
/// spawn and never comes back.
pub(crate) struct WorkerProcess {
    pub worker_id: String,
    pub pid: u32,
    pub child: Child,
    pub task_pipe: Option<UnixStream>,
    pub in_use: bool,
    pub last_activity: Instant,
    pub assigned_event_id: Option<String>,
    pub registered_types: HashSet<String>,
    /// Set by the health monitor once the worker is declared dead.
    pub dead: Arc<AtomicBool>,
}

impl WorkerProcess {
    /// Kill the underlying process and reap it. Safe to call on an
    /// already-exited worker.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Wait up to `deadline` for a voluntary exit, then kill.
    pub fn wait_or_kill(&mut self, deadline: Duration) {
        let end = Instant::now() + deadline;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < end => thread::sleep(ACCEPT_POLL),
                Ok(None) | Err(_) => {
                    warn!(worker_id = %self.worker_id, "worker did not exit in time, killing");
                    self.kill();
                    return;
                }
            }
        }
    }
}

pub(crate) struct SpawnedWorker {
    pub worker_id: String,
    pub pid: u32,
    pub child: Child,
    pub task_pipe: UnixStream,
    pub health_pipe: UnixStream,
}

/// Launch one worker process and wait for it to connect both pipes.
///
/// The child is started with `--worker-id` and `--socket` (plus the idle
/// window) and connects to the listener twice: the first connection is
/// the task pipe, the second the health pipe.
pub(crate) fn spawn_worker(
    program: &Path,
    args: &[String],
    socket_dir: &Path,
    idle_timeout_secs: u64,
) -> Result<SpawnedWorker, SpawnError> {
    let worker_id = format!("corelet-{}", uuid::Uuid::new_v4().simple());
    let socket_path = socket_dir.join(format!("{worker_id}.sock"));
    let listener = UnixListener::bind(&socket_path)?;
    listener.set_nonblocking(true)?;

    let mut child = Command::new(program)
        .args(args)
        .arg("--worker-id")
        .arg(&worker_id)
        .arg("--socket")
        .arg(&socket_path)
        .arg("--idle-timeout-secs")
        .arg(idle_timeout_secs.to_string())
        .stdin(Stdio::null())
        .spawn()?;

    let task_pipe = accept_with_deadline(&listener, &mut child, &worker_id)?;
    let health_pipe = accept_with_deadline(&listener, &mut child, &worker_id)?;
    task_pipe.set_nonblocking(false)?;
    health_pipe.set_nonblocking(false)?;

    // Both connections are up; the filesystem entry has served its
    // purpose.
    let _ = std::fs::remove_file(&socket_path);

    let pid = child.id();
    info!(worker_id, pid, "worker process started");
    Ok(SpawnedWorker {
        worker_id,
        pid,
        child,
        task_pipe,
        health_pipe,
    })
}

fn accept_with_deadline(
    listener: &UnixListener,
    child: &mut Child,
    worker_id: &str,
) -> Result<UnixStream, SpawnError> {
    let deadline = Instant::now() + ACCEPT_TIMEOUT;
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(worker_id, %status, "worker exited before connecting");
                    return Err(SpawnError::EarlyExit(worker_id.to_string()));
                }
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SpawnError::ConnectTimeout(
                        worker_id.to_string(),
                        ACCEPT_TIMEOUT,
                    ));
                }
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}
