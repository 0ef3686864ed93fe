//! Demo handlers and worker wiring for exercising the bus end to end.
//!
//! Everything here is deliberately small: an echo, a sleeper, a flaky
//! failer, and a Monte Carlo estimator that reports progress through
//! alive signals. The `corebus-worker` binary registers the same set, so
//! corelet events published by the tests resolve in the worker process.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use corebus_core::Event;
use corebus_core::EventContext;
use corebus_core::EventError;
use corebus_core::EventHandler;
use corebus_core::HandlerRegistry;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

pub const ECHO_EVENT: &str = "echo";
pub const SLEEP_EVENT: &str = "sleep";
pub const FLAKY_EVENT: &str = "flaky";
pub const MONTE_CARLO_EVENT: &str = "monte_carlo_pi";

/// Registered by the worker binary only; exercises handler resolution
/// inside the worker when the publishing side has no locator to offer.
pub const WORKER_ONLY_ECHO_EVENT: &str = "worker_only_echo";

/// Register the demo handlers on the process-global registry. Both the
/// publishing process and the worker binary call this.
pub fn register_demo_handlers() {
    let registry = HandlerRegistry::global();
    registry.register::<EchoHandler>(ECHO_EVENT);
    registry.register::<SleepHandler>(SLEEP_EVENT);
    registry.register::<FlakyHandler>(FLAKY_EVENT);
    registry.register::<MonteCarloPiHandler>(MONTE_CARLO_EVENT);
}

/// Additional registrations only the worker process performs.
pub fn register_worker_only_handlers() {
    HandlerRegistry::global().register::<EchoHandler>(WORKER_ONLY_ECHO_EVENT);
}

/// Returns the event payload unchanged.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl EventHandler for EchoHandler {
    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        Ok(Some(event.data.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct SleepRequest {
    duration_ms: u64,
}

/// Sleeps for `data.duration_ms` and reports how long it slept. Used to
/// provoke timeouts and to occupy workers.
#[derive(Debug, Default)]
pub struct SleepHandler;

impl EventHandler for SleepHandler {
    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        let request: SleepRequest = serde_json::from_value(event.data.clone())
            .map_err(|e| EventError::execution(format!("invalid sleep payload: {e}")))?;
        thread::sleep(Duration::from_millis(request.duration_ms));
        Ok(Some(json!({ "slept_ms": request.duration_ms })))
    }
}

/// Fails `data.fail_times` attempts before succeeding. The counter lives
/// on the instance, which the executing thread or worker caches, so
/// retries land on the same counter.
#[derive(Debug, Default)]
pub struct FlakyHandler {
    seen: AtomicU32,
}

impl EventHandler for FlakyHandler {
    fn handle(
        &self,
        event: &Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        let fail_times = event.data["fail_times"].as_u64().unwrap_or(0) as u32;
        let attempt = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= fail_times {
            Err(EventError::execution(format!("flaky attempt {attempt}")))
        } else {
            Ok(Some(json!({ "succeeded_on": attempt })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct MonteCarloRequest {
    samples: u64,
}

/// Estimates pi by sampling, signalling liveness every chunk so a long
/// run survives health probing.
#[derive(Debug, Default)]
pub struct MonteCarloPiHandler;

impl EventHandler for MonteCarloPiHandler {
    fn handle(
        &self,
        event: &Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<Option<Value>, EventError> {
        let request: MonteCarloRequest = serde_json::from_value(event.data.clone())
            .map_err(|e| EventError::execution(format!("invalid monte carlo payload: {e}")))?;

        let mut rng = rand::rng();
        let mut inside: u64 = 0;
        let chunk = 100_000u64.min(request.samples.max(1));
        let mut done: u64 = 0;
        while done < request.samples {
            let batch = chunk.min(request.samples - done);
            for _ in 0..batch {
                let x: f64 = rng.random();
                let y: f64 = rng.random();
                if x * x + y * y <= 1.0 {
                    inside += 1;
                }
            }
            done += batch;
            ctx.send_alive(format!("sampled {done}/{}", request.samples));
            if ctx.deadline_exceeded() {
                return Err(EventError::Timeout {
                    timeout_secs: event.timeout_secs,
                });
            }
        }

        let estimate = 4.0 * inside as f64 / request.samples.max(1) as f64;
        Ok(Some(json!({ "samples": request.samples, "pi": estimate })))
    }
}

#[cfg(test)]
#[path = "lib.test.rs"]
mod tests;
