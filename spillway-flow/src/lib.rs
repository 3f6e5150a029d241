//! Memory admission and flush scheduling for spillway.
//!
//! This crate holds the synchronous, deterministic half of the engine:
//!
//! - **Memory governor**: a global byte ledger handing out fixed-size grants.
//! - **Stream queues**: memory-bounded FIFOs, one per stream, created lazily.
//! - **Flush selector**: a pure function choosing the next stream to flush.
//! - **Running-worker registry**: per-stream in-flight flush counts.
//! - **Sequencer**: one admission order across records and checkpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreamQueuePool                           │
//! │                                                                  │
//! │  ┌──────────────┐   grants   ┌──────────────┐                    │
//! │  │ StreamQueue  │◀──────────│MemoryGovernor│◀── Batch::drop      │
//! │  │  (per stream)│           └──────────────┘    (release)        │
//! │  └──────┬───────┘                                                │
//! └─────────┼────────────────────────────────────────────────────────┘
//!           │ snapshot                       ┌────────────────┐
//!           └──────────▶ select_next ◀───────│ RunningWorkers │
//!                                            └────────────────┘
//! ```
//!
//! # DST Compatibility
//!
//! Nothing here reads the system clock. Enqueue and selection take
//! `now_us` as a parameter, so tests drive time explicitly.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod selector;
pub mod sequence;

pub use error::{FlowError, FlowResult};
pub use memory::MemoryGovernor;
pub use pool::{Batch, QueueUsage, StreamQueuePool};
pub use queue::{Drained, StreamQueue};
pub use registry::RunningWorkers;
pub use selector::{
    compute_queue_threshold, effective_bytes, order_streams, select_next, FlushCandidate,
    FlushTrigger, QueueSnapshot, SelectorConfig, SelectorInput,
};
pub use sequence::Sequencer;
