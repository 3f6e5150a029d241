//! Async runtime half of the spillway buffering engine.
//!
//! A [`BufferEngine`] accepts messages from a single producer, buffers them
//! per stream under a global memory ceiling, and drains the buffers into a
//! [`FlushTarget`] from a bounded pool of concurrent flush workers.
//!
//! # Architecture
//!
//! ```text
//!  producer ──submit──▶ ingestion gateway ──offer──▶ StreamQueuePool
//!                         │      ▲ backoff                 │
//!                         │      └── memory exhausted      │ snapshot
//!                         ▼                                ▼
//!                  CheckpointTracker            flush supervisor (tick)
//!                  (holds states until                     │ select_next /
//!                   their records flush)                   │ flush_all
//!                         ▲                                ▼
//!                         │ complete               WorkerPool (N slots)
//!                         └──────────── flush task ──▶ FlushTarget
//! ```
//!
//! # Lifecycle
//!
//! 1. [`BufferEngine::new`] validates the configuration.
//! 2. [`BufferEngine::start`] spawns the supervisor and diagnostics loops.
//! 3. [`BufferEngine::submit`] is called once per message.
//! 4. [`BufferEngine::close`] flushes everything admitted and reports.
//!
//! A flush failure is fatal to the run: the next `submit` and `close`
//! both return it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod checkpoint;
pub mod config;
mod engine;
pub mod error;
pub mod failure;
mod flush;
mod ingest;
pub mod stats;
mod supervisor;
pub mod target;
pub mod worker;

pub use checkpoint::{
    CheckpointTracker, EmittedState, NoopStateCollector, RecordingStateCollector, StateCollector,
};
pub use config::{default_memory_ceiling, EngineConfig};
pub use engine::{BufferEngine, ShutdownReport};
pub use error::{EngineError, EngineResult};
pub use failure::{FlushFailure, StreamFailureCounts};
pub use stats::{Diagnostics, EngineStats, EngineStatsSnapshot};
pub use target::{
    FlushFaultConfig, FlushTarget, FlushTargetError, FlushedBatch, SimulatedFlushTarget,
};
pub use worker::{DrainOutcome, TaskPanic, WorkerPool};
