//! Built-in handlers behind the `_shutdown` and `_cmd_execution` event
//! types.

use std::io::Read;
use std::process::Command;
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use corebus_protocol::Event;
use corebus_protocol::EventError;
use corebus_protocol::ExecMode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::handler::EventContext;
use crate::handler::EventHandler;

/// Interval between exit checks while a command runs.
const CMD_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Handler for the internal `_shutdown` event type. The pool recognizes
/// the event type itself as a stop signal; the handler only has to
/// complete successfully.
#[derive(Debug, Default)]
pub(crate) struct ShutdownHandler;

impl EventHandler for ShutdownHandler {
    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        debug!(event_id = %event.event_id, "shutdown signal handled");
        Ok(None)
    }
}

/// Payload expected by the `_cmd_execution` handler.
#[derive(Debug, Deserialize)]
struct CmdRequest {
    command: String,
}

/// What a finished command looked like. Carried as the result data of a
/// `cmd` event; a non-zero exit code is still a successful event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Handler for `cmd` mode: runs `data.command` through the shell, bounded
/// by the event's timeout.
#[derive(Debug, Default)]
pub(crate) struct CmdHandler;

impl EventHandler for CmdHandler {
    fn preferred_exec_mode(&self) -> ExecMode {
        ExecMode::Cmd
    }

    fn handle(
        &self,
        event: &Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        let request: CmdRequest = serde_json::from_value(event.data.clone())
            .map_err(|e| EventError::execution(format!("invalid cmd payload: {e}")))?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EventError::execution(format!("failed to spawn command: {e}")))?;

        // Drain both pipes on their own threads so a chatty command cannot
        // fill a pipe buffer and stall behind the exit poll below.
        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        let mut timed_out = false;
        let exited = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "failed to poll command");
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
            }
            if ctx.deadline_exceeded() {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(CMD_POLL_INTERVAL);
        };

        let stdout = join_pipe_reader(stdout_reader);
        let stderr = join_pipe_reader(stderr_reader);

        let Some(status) = exited else {
            if timed_out {
                return Err(EventError::Timeout {
                    timeout_secs: event.timeout_secs,
                });
            }
            return Err(EventError::execution("failed to poll command"));
        };

        let outcome = CmdOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        };
        debug!(
            event_id = %event.event_id,
            exit_code = outcome.exit_code,
            "command finished"
        );
        let value = serde_json::to_value(&outcome)
            .map_err(|e| EventError::execution(format!("failed to encode command outcome: {e}")))?;
        Ok(Some(value))
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn join_pipe_reader(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "handlers.test.rs"]
mod tests;
