//! Workload generation and execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spillway_core::{Message, StateScope, StreamId};
use spillway_engine::{
    BufferEngine, EngineConfig, EngineError, EngineStatsSnapshot, RecordingStateCollector,
    ShutdownReport, SimulatedFlushTarget,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::history::History;
use crate::payload::{RecordPayload, PAYLOAD_SIZE_MIN};
use crate::verification::{Delivered, Verification, Violation};

/// Namespace of generated streams.
pub const WORKLOAD_NAMESPACE: &str = "load";

/// Message size distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDistribution {
    /// Fixed size for all messages.
    Fixed(usize),
    /// Uniform distribution between min and max.
    Uniform {
        /// Minimum size.
        min: usize,
        /// Maximum size.
        max: usize,
    },
}

impl SizeDistribution {
    /// Samples a size from the distribution.
    #[must_use]
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        match self {
            Self::Fixed(size) => *size,
            Self::Uniform { min, max } => rng.gen_range(*min..=*max),
        }
    }
}

impl Default for SizeDistribution {
    fn default() -> Self {
        Self::Uniform { min: 64, max: 2048 }
    }
}

/// Workload configuration.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Random seed for deterministic generation.
    pub seed: u64,
    /// Number of streams records are spread over.
    pub streams: u32,
    /// Records to submit in total.
    pub records: u64,
    /// Payload data size distribution.
    pub message_size: SizeDistribution,
    /// Submit a stream state after every N records of that stream. 0 disables.
    pub state_every: u64,
    /// Submit a global state after every N records. 0 disables.
    pub global_state_every: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            streams: 8,
            records: 10_000,
            message_size: SizeDistribution::default(),
            state_every: 100,
            global_state_every: 1000,
        }
    }
}

/// Builder for creating workloads.
#[derive(Debug, Clone, Default)]
pub struct WorkloadBuilder {
    config: WorkloadConfig,
}

impl WorkloadBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the random seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the number of streams.
    #[must_use]
    pub const fn streams(mut self, streams: u32) -> Self {
        self.config.streams = streams;
        self
    }

    /// Sets the total number of records.
    #[must_use]
    pub const fn records(mut self, records: u64) -> Self {
        self.config.records = records;
        self
    }

    /// Sets the payload size distribution.
    #[must_use]
    pub const fn message_size(mut self, size: SizeDistribution) -> Self {
        self.config.message_size = size;
        self
    }

    /// Sets the per-stream state interval.
    #[must_use]
    pub const fn state_every(mut self, records: u64) -> Self {
        self.config.state_every = records;
        self
    }

    /// Sets the global state interval.
    #[must_use]
    pub const fn global_state_every(mut self, records: u64) -> Self {
        self.config.global_state_every = records;
        self
    }

    /// Builds the workload.
    #[must_use]
    pub fn build(self) -> Workload {
        Workload::new(self.config)
    }
}

/// Errors that end a workload run early.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Workload configuration is unusable.
    #[error("invalid workload: {0}")]
    InvalidConfig(String),

    /// The engine failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result of a completed workload run.
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    /// Delivery property violations. Empty on success.
    pub violations: Vec<Violation>,
    /// Engine shutdown report.
    pub shutdown: ShutdownReport,
    /// Records submitted.
    pub records_submitted: u64,
    /// State messages submitted.
    pub states_submitted: u64,
    /// Payload bytes submitted.
    pub payload_bytes: u64,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl WorkloadReport {
    /// Returns true if the run drained cleanly with no violations.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.shutdown.clean
    }

    /// Returns the engine's final counters.
    #[must_use]
    pub const fn stats(&self) -> &EngineStatsSnapshot {
        &self.shutdown.stats
    }
}

/// A seeded single-producer workload.
#[derive(Debug)]
pub struct Workload {
    config: WorkloadConfig,
    rng: ChaCha8Rng,
    history: History,
    streams: Vec<StreamId>,
}

impl Workload {
    /// Creates a new workload from configuration.
    #[must_use]
    pub fn new(config: WorkloadConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            history: History::new(),
            streams: Vec::new(),
        }
    }

    /// Creates a workload builder.
    #[must_use]
    pub fn builder() -> WorkloadBuilder {
        WorkloadBuilder::new()
    }

    /// Returns the workload configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Returns the submission history.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Runs the workload through a fresh engine, closes it, and verifies
    /// what `target` and the state collector received.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Engine`] if the engine rejects a message or
    /// reports a flush failure on close.
    pub async fn run(
        &mut self,
        engine_config: EngineConfig,
        target: &SimulatedFlushTarget,
    ) -> Result<WorkloadReport, WorkloadError> {
        if self.config.streams == 0 {
            return Err(WorkloadError::InvalidConfig(
                "at least one stream is required".to_string(),
            ));
        }
        self.streams = (0..self.config.streams)
            .map(|i| StreamId::new(WORKLOAD_NAMESPACE, format!("stream-{i}")))
            .collect::<Result<_, _>>()
            .map_err(|err| WorkloadError::InvalidConfig(err.to_string()))?;

        let collector = Arc::new(RecordingStateCollector::new());
        let engine = BufferEngine::with_state_collector(
            engine_config,
            Arc::new(target.clone()),
            collector.clone(),
        )?;
        engine.start()?;

        info!(
            seed = self.config.seed,
            streams = self.config.streams,
            records = self.config.records,
            "starting workload"
        );
        let start = Instant::now();
        if let Err(err) = self.submit_all(&engine).await {
            warn!(error = %err, "submission stopped early");
            // Close surfaces the root cause if a flush failed first.
            engine.close().await?;
            return Err(err.into());
        }
        let shutdown = engine.close().await?;
        let duration = start.elapsed();

        let records = target.delivered_by_stream();
        let batches = target.batches();
        let states = collector.states();
        let violations = Verification::verify(
            &self.history,
            Delivered {
                records: &records,
                batches: &batches,
                states: &states,
            },
        );

        let report = WorkloadReport {
            violations,
            shutdown,
            records_submitted: self.history.total_records(),
            states_submitted: self.history.states().len() as u64,
            payload_bytes: self.history.payload_bytes(),
            duration,
        };
        info!(
            records = report.records_submitted,
            states = report.states_submitted,
            violations = report.violations.len(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "workload complete"
        );
        Ok(report)
    }

    async fn submit_all(&mut self, engine: &BufferEngine) -> Result<(), EngineError> {
        for submitted in 1..=self.config.records {
            let index = self.rng.gen_range(0..self.streams.len());
            let stream = self.streams[index].clone();
            let size = self.config.message_size.sample(&mut self.rng);

            let stream_index = index as u64;
            let sequence =
                self.history
                    .record_submit(&stream, stream_index, (size + PAYLOAD_SIZE_MIN) as u64);
            let payload = RecordPayload::new(stream_index, sequence, size, &mut self.rng);
            engine
                .submit(Message::record(stream.clone(), payload.encode()))
                .await?;

            if self.config.state_every > 0 && (sequence + 1) % self.config.state_every == 0 {
                self.history.state_submit(StateScope::Stream(stream.clone()));
                engine
                    .submit(Message::stream_state(stream, cursor(sequence)))
                    .await?;
            }
            if self.config.global_state_every > 0 && submitted % self.config.global_state_every == 0 {
                self.history.state_submit(StateScope::Global);
                engine.submit(Message::global_state(cursor(submitted))).await?;
            }
        }
        Ok(())
    }
}

fn cursor(position: u64) -> Bytes {
    Bytes::from(format!("{{\"cursor\":{position}}}"))
}
