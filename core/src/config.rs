//! Bus construction options.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Options accepted by [`crate::EventBus::new`].
///
/// Every field has a default, so configuration can be deserialized from a
/// partial document or built with struct-update syntax from
/// `EventBusConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Worker threads draining the priority queue.
    pub thread_pool_size: usize,

    /// Maximum concurrent worker processes.
    pub process_pool_max: usize,

    /// A worker process exits on its own after this much idle time.
    pub process_idle_timeout_secs: u64,

    /// Ping cadence of the per-worker health monitor.
    pub health_interval_secs: u64,

    /// Missed pings tolerated before a worker is declared dead.
    pub health_grace_misses: u32,

    /// Timeout applied by [`crate::EventBus::event`] when the publisher
    /// does not specify one.
    pub default_timeout_secs: u64,

    /// Retry budget applied by [`crate::EventBus::event`] when the
    /// publisher does not specify one.
    pub default_max_retries: u32,

    /// How long `shutdown` waits for worker processes to acknowledge
    /// before killing them.
    pub shutdown_grace_secs: u64,

    /// Program spawned as the worker process. Defaults to the current
    /// executable, which works when the embedding binary dispatches to
    /// [`crate::worker::run`] on the worker arguments.
    pub worker_program: Option<PathBuf>,

    /// Extra arguments placed before the worker contract arguments.
    pub worker_args: Vec<String>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: hardware_concurrency(),
            process_pool_max: hardware_concurrency(),
            process_idle_timeout_secs: 600,
            health_interval_secs: 5,
            health_grace_misses: 1,
            default_timeout_secs: 30,
            default_max_retries: 3,
            shutdown_grace_secs: 5,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

#[cfg(test)]
#[path = "config.test.rs"]
mod tests;
