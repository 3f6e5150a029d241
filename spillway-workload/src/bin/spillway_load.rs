//! Load generator for the spillway buffering engine.
//!
//! Runs a seeded workload through an engine backed by a simulated flush
//! target and exits non-zero if any delivery property is violated.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use spillway_engine::{EngineConfig, FlushFaultConfig, SimulatedFlushTarget};
use spillway_workload::{SizeDistribution, Workload, PAYLOAD_SIZE_MAX};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Spillway load generator.
#[derive(Parser, Debug)]
#[command(name = "spillway-load")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Random seed.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of streams.
    #[arg(long, default_value = "8")]
    streams: u32,

    /// Total records to submit.
    #[arg(long, default_value = "100000")]
    records: u64,

    /// Minimum payload data size in bytes.
    #[arg(long, default_value = "64")]
    min_size: usize,

    /// Maximum payload data size in bytes.
    #[arg(long, default_value = "4096")]
    max_size: usize,

    /// Stream state every N records of a stream (0 disables).
    #[arg(long, default_value = "500")]
    state_every: u64,

    /// Global state every N records (0 disables).
    #[arg(long, default_value = "5000")]
    global_state_every: u64,

    /// Memory ceiling in bytes. Defaults to 80% of available memory.
    #[arg(long)]
    max_memory: Option<u64>,

    /// Concurrent flush workers.
    #[arg(long, default_value = "4")]
    workers: u32,

    /// Preferred flush batch size in bytes.
    #[arg(long, default_value = "1048576")]
    batch_bytes: u64,

    /// Probability that a flush fails (0.0 to 1.0).
    #[arg(long, default_value = "0.0")]
    fail_rate: f64,

    /// Artificial latency of every flush call, in milliseconds.
    #[arg(long, default_value = "0")]
    flush_latency_ms: u64,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
        return ExitCode::FAILURE;
    }

    if args.min_size > args.max_size || args.max_size > PAYLOAD_SIZE_MAX {
        error!(
            min_size = args.min_size,
            max_size = args.max_size,
            limit = PAYLOAD_SIZE_MAX,
            "invalid payload size range"
        );
        return ExitCode::FAILURE;
    }

    let mut config = EngineConfig::default().with_worker_pool_size(args.workers);
    if let Some(max_memory) = args.max_memory {
        let limits = config.limits;
        let block_size = limits.block_size_bytes.min(max_memory);
        config = config.with_limits(
            limits
                .with_max_memory_bytes(max_memory)
                .with_block_size_bytes(block_size),
        );
    }

    let faults = FlushFaultConfig::none()
        .with_flush_fail_rate(args.fail_rate)
        .with_latency(Duration::from_millis(args.flush_latency_ms));
    let target = SimulatedFlushTarget::with_faults(args.batch_bytes, args.seed, faults);

    let mut workload = Workload::builder()
        .seed(args.seed)
        .streams(args.streams)
        .records(args.records)
        .message_size(SizeDistribution::Uniform {
            min: args.min_size,
            max: args.max_size,
        })
        .state_every(args.state_every)
        .global_state_every(args.global_state_every)
        .build();

    let report = match workload.run(config, &target).await {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "workload failed");
            return ExitCode::FAILURE;
        }
    };

    let stats = report.stats();
    info!(
        records = report.records_submitted,
        states = report.states_submitted,
        payload_bytes = report.payload_bytes,
        batches = stats.batches_flushed,
        backpressure_waits = stats.backpressure_waits,
        flush_all_escalations = stats.flush_all_escalations,
        peak_in_flight = target.peak_in_flight(),
        duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        "run summary"
    );
    for violation in &report.violations {
        error!("{violation}");
    }

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
