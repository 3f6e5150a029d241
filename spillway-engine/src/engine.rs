//! The buffering engine and its lifecycle.
//!
//! One [`BufferEngine`] serves one sync run. It owns the memory governor,
//! the queue pool, the worker registry, the worker pool and the checkpoint
//! tracker, and shares them with its background loops through an `Arc`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use spillway_core::{Message, StreamId};
use spillway_flow::{MemoryGovernor, RunningWorkers, SelectorConfig, StreamQueuePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointTracker, NoopStateCollector, StateCollector};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::failure::{FlushFailure, StreamFailureCounts};
use crate::stats::{Diagnostics, EngineStats, EngineStatsSnapshot};
use crate::supervisor::{diagnostics_task, supervisor_task};
use crate::target::FlushTarget;
use crate::worker::WorkerPool;

/// State shared between the engine handle, its loops and flush tasks.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) selector_config: SelectorConfig,
    pub(crate) governor: Arc<MemoryGovernor>,
    pub(crate) pool: StreamQueuePool,
    pub(crate) registry: RunningWorkers,
    pub(crate) workers: WorkerPool,
    pub(crate) target: Arc<dyn FlushTarget>,
    pub(crate) checkpoints: CheckpointTracker,
    pub(crate) failure: FlushFailure,
    pub(crate) stats: EngineStats,
    pub(crate) next_flush_id: AtomicU64,
    closing: AtomicBool,
    origin: Instant,
}

impl EngineShared {
    /// Microseconds since the engine was created.
    pub(crate) fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            queued_tasks: self.workers.queued(),
            active_workers: self.workers.active(),
            memory_used_bytes: self.governor.used_bytes(),
            memory_max_bytes: self.governor.max_bytes(),
            queued_bytes: self.pool.total_queued_bytes(),
            streams: self.pool.stream_count() as u64,
        }
    }
}

/// Handles to the background loops. Dropping the senders stops the loops.
struct Loops {
    supervisor_shutdown: mpsc::Sender<()>,
    diagnostics_shutdown: mpsc::Sender<()>,
    supervisor: JoinHandle<()>,
    diagnostics: JoinHandle<()>,
}

/// Result of [`BufferEngine::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// True if every admitted record was flushed and no task was left running.
    pub clean: bool,
    /// Records still queued.
    pub remaining_records: u64,
    /// Bytes still queued.
    pub remaining_bytes: u64,
    /// Flush tasks still running when the timeout expired.
    pub outstanding_tasks: u64,
    /// States never released.
    pub pending_states: u64,
    /// Final counters.
    pub stats: EngineStatsSnapshot,
}

/// Write-side buffering and flush-scheduling engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use spillway_core::{Message, StreamId};
/// use spillway_engine::{BufferEngine, EngineConfig, SimulatedFlushTarget};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let target = Arc::new(SimulatedFlushTarget::new(1024 * 1024));
/// let engine = BufferEngine::new(EngineConfig::default(), target)?;
/// engine.start()?;
///
/// let users = StreamId::new("public", "users")?;
/// engine.submit(Message::record(users, "{\"id\":1}")).await?;
///
/// let report = engine.close().await?;
/// assert!(report.clean);
/// # Ok(())
/// # }
/// ```
pub struct BufferEngine {
    shared: Arc<EngineShared>,
    loops: Mutex<Option<Loops>>,
    started: AtomicBool,
}

impl std::fmt::Debug for BufferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferEngine")
            .field("config", &self.shared.config)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closing", &self.shared.is_closing())
            .finish_non_exhaustive()
    }
}

impl BufferEngine {
    /// Creates an engine that discards released states.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: EngineConfig, target: Arc<dyn FlushTarget>) -> EngineResult<Self> {
        Self::with_state_collector(config, target, Arc::new(NoopStateCollector))
    }

    /// Creates an engine releasing states to `collector`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidConfig`] if the configuration is invalid
    /// or the target prefers empty batches.
    pub fn with_state_collector(
        config: EngineConfig,
        target: Arc<dyn FlushTarget>,
        collector: Arc<dyn StateCollector>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let batch_bytes = target.preferred_batch_size_bytes();
        if batch_bytes == 0 {
            return Err(EngineError::InvalidConfig {
                message: "flush target preferred batch size must be positive".to_string(),
            });
        }

        let governor = Arc::new(MemoryGovernor::new(
            config.limits.max_memory_bytes,
            config.limits.block_size_bytes,
        ));
        let shared = EngineShared {
            selector_config: SelectorConfig::from_limits(&config.limits, batch_bytes),
            pool: StreamQueuePool::new(Arc::clone(&governor)),
            governor,
            registry: RunningWorkers::new(),
            workers: WorkerPool::new(config.worker_pool_size),
            target,
            checkpoints: CheckpointTracker::new(collector),
            failure: FlushFailure::new(),
            stats: EngineStats::new(),
            next_flush_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            origin: Instant::now(),
            config,
        };

        info!(
            max_memory_bytes = shared.config.limits.max_memory_bytes,
            block_size_bytes = shared.config.limits.block_size_bytes,
            worker_pool_size = shared.config.worker_pool_size,
            preferred_batch_bytes = batch_bytes,
            "buffer engine created"
        );
        Ok(Self {
            shared: Arc::new(shared),
            loops: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Starts the flush supervisor and diagnostics loops.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`EngineError::AlreadyStarted`] on a second call and
    /// [`EngineError::Closed`] once close has begun.
    pub fn start(&self) -> EngineResult<()> {
        if self.shared.is_closing() {
            return Err(EngineError::Closed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }

        let (supervisor_shutdown, supervisor_rx) = mpsc::channel(1);
        let (diagnostics_shutdown, diagnostics_rx) = mpsc::channel(1);
        let supervisor = tokio::spawn(supervisor_task(Arc::clone(&self.shared), supervisor_rx));
        let diagnostics = tokio::spawn(diagnostics_task(Arc::clone(&self.shared), diagnostics_rx));

        *self.loops.lock() = Some(Loops {
            supervisor_shutdown,
            diagnostics_shutdown,
            supervisor,
            diagnostics,
        });
        info!(
            interval_ms = u64::try_from(self.shared.config.supervisor_interval.as_millis())
                .unwrap_or(u64::MAX),
            "flush supervisor started"
        );
        Ok(())
    }

    /// Submits one message.
    ///
    /// Records wait here while memory is exhausted. State messages are held
    /// until every record admitted before them has been flushed.
    ///
    /// # Errors
    /// - The first flush failure, once any flush has failed.
    /// - [`EngineError::Closed`] once close has begun.
    /// - [`EngineError::Flow`] if the record can never fit or memory stays
    ///   exhausted past the admission attempt cap.
    pub async fn submit(&self, message: Message) -> EngineResult<()> {
        self.shared.submit(message).await
    }

    /// Flushes everything that was admitted and stops the engine.
    ///
    /// Runs flush-all rounds until every queue is empty, waiting for each
    /// round's tasks, bounded by the shutdown timeout. A timeout yields a
    /// report with `clean == false`; the caller decides whether that is fatal.
    ///
    /// # Errors
    /// Returns the first flush failure if any flush failed, and
    /// [`EngineError::Closed`] if close was already called.
    pub async fn close(&self) -> EngineResult<ShutdownReport> {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Closed);
        }
        info!(
            queued_bytes = shared.pool.total_queued_bytes(),
            queued_records = shared.pool.total_queued_records(),
            "closing buffer engine"
        );
        self.stop_loops().await;

        let deadline = Instant::now() + shared.config.shutdown_timeout;
        let mut outstanding = 0;
        let mut rounds: u64 = 0;
        loop {
            for panic in shared.workers.reap() {
                shared.record_panic(panic);
            }
            if shared.failure.is_failed() {
                break;
            }
            if shared.pool.non_empty_streams().is_empty() && shared.workers.pending() == 0 {
                break;
            }

            shared.flush_all();
            rounds += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = shared.workers.wait_idle(remaining).await;
            for panic in outcome.panics {
                shared.record_panic(panic);
            }
            if outcome.outstanding > 0 {
                outstanding = outcome.outstanding as u64;
                break;
            }
        }

        // Nothing will be admitted again; idle headroom goes back to the
        // governor. Detached tasks still return their batches on completion.
        let freed = shared.pool.release_headroom();
        debug!(freed_bytes = freed, "released queue headroom");

        if let Some(err) = shared.failure.first() {
            warn!(error = %err, "buffer engine closed after flush failure");
            return Err(err);
        }

        let remaining_records = shared.pool.total_queued_records() as u64;
        let report = ShutdownReport {
            clean: outstanding == 0 && remaining_records == 0,
            remaining_records,
            remaining_bytes: shared.pool.total_queued_bytes(),
            outstanding_tasks: outstanding,
            pending_states: shared.checkpoints.pending_count() as u64,
            stats: shared.stats.snapshot(),
        };

        if report.clean {
            info!(
                rounds,
                records_flushed = report.stats.records_flushed,
                bytes_flushed = report.stats.bytes_flushed,
                "buffer engine closed cleanly"
            );
        } else {
            warn!(
                remaining_records = report.remaining_records,
                remaining_bytes = report.remaining_bytes,
                outstanding_tasks = report.outstanding_tasks,
                "buffer engine did not drain before timeout"
            );
        }
        Ok(report)
    }

    async fn stop_loops(&self) {
        let loops = self.loops.lock().take();
        if let Some(loops) = loops {
            drop(loops.supervisor_shutdown);
            drop(loops.diagnostics_shutdown);
            // The loops only exit on shutdown; a join error means a panic
            // that has already been reported by the runtime.
            let _ = loops.supervisor.await;
            let _ = loops.diagnostics.await;
        }
    }

    /// Returns the engine's counters.
    #[must_use]
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns pool and memory state.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.shared.diagnostics()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the first flush failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<EngineError> {
        self.shared.failure.first()
    }

    /// Returns how many batches and records failed for `stream`.
    #[must_use]
    pub fn failure_counts(&self, stream: &StreamId) -> StreamFailureCounts {
        self.shared.failure.counts(stream)
    }

    /// Runs a single supervisor pass immediately.
    ///
    /// The periodic loop does this on its own; tests and callers driving
    /// time themselves use it to step the engine.
    pub fn supervise_now(&self) {
        self.shared.supervise_once();
    }
}
