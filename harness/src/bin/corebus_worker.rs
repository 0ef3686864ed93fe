//! Worker-process entrypoint wired to the demo handlers.
//!
//! Spawned by the worker-process pool with the contract arguments; logs
//! to stderr so worker output lands in the parent's configured sink.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use corebus_core::worker;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "corebus-worker", about = "corebus corelet worker process")]
struct Args {
    /// Identifier assigned by the pool.
    #[arg(long)]
    worker_id: String,

    /// Unix socket to connect the task and health pipes through.
    #[arg(long)]
    socket: PathBuf,

    /// Exit on our own after this much idle time.
    #[arg(long, default_value_t = 600)]
    idle_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    corebus_harness::register_demo_handlers();
    corebus_harness::register_worker_only_handlers();

    worker::run(worker::WorkerOptions {
        worker_id: args.worker_id,
        socket_path: args.socket,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
    })
    .context("worker loop failed")
}
