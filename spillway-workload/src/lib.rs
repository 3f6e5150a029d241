//! Spillway Workload: verifiable load generation.
//!
//! Drives a [`spillway_engine::BufferEngine`] with a seeded, single-producer
//! stream of self-describing records and state messages, closes it, and
//! checks what the flush target and state collector received:
//!
//! 1. **No loss**: every submitted record is flushed exactly once.
//! 2. **FIFO**: each stream drains in submission order.
//! 3. **State release**: every state is released once, in order, covering
//!    exactly the records submitted before it.
//!
//! # Example
//!
//! ```ignore
//! use spillway_engine::{EngineConfig, SimulatedFlushTarget};
//! use spillway_workload::Workload;
//!
//! let target = SimulatedFlushTarget::new(1024 * 1024);
//! let mut workload = Workload::builder().seed(42).streams(4).records(10_000).build();
//! let report = workload.run(EngineConfig::default(), &target).await?;
//! assert!(report.passed());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod history;
mod payload;
mod verification;
mod workload;

pub use history::{History, SubmittedState};
pub use payload::{PayloadError, RecordPayload, PAYLOAD_SIZE_MAX, PAYLOAD_SIZE_MIN};
pub use verification::{Delivered, Verification, Violation};
pub use workload::{
    SizeDistribution, Workload, WorkloadBuilder, WorkloadConfig, WorkloadError, WorkloadReport,
    WORKLOAD_NAMESPACE,
};
