//! Property definitions and checkers for spillway tests.
//!
//! Properties are invariants that must hold at every observation point of a
//! run, not only at the end.

use std::collections::HashMap;

use spillway_core::{SeqNo, StreamId};
use spillway_engine::Diagnostics;
use spillway_flow::{Batch, StreamQueuePool};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a buffering property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// The governor granted more than its maximum.
    MemoryCeilingExceeded {
        /// Bytes granted.
        used: u64,
        /// Ledger maximum.
        max: u64,
    },
    /// A queue holds more bytes than its ceiling.
    QueueOverCeiling {
        /// The stream.
        stream: StreamId,
        /// Queued bytes.
        used: u64,
        /// Queue ceiling.
        ceiling: u64,
    },
    /// Granted bytes are not all accounted for by queues and open batches.
    LedgerMismatch {
        /// Bytes the governor reports as granted.
        governor_used: u64,
        /// Sum of queue ceilings.
        queue_ceilings: u64,
        /// Bytes held by batches not yet dropped.
        outstanding_batches: u64,
    },
    /// More flush tasks ran at once than the pool has slots.
    WorkerLimitExceeded {
        /// Tasks observed running.
        active: u64,
        /// Pool size.
        size: u64,
    },
    /// A stream drained a record before one admitted earlier.
    FifoViolation {
        /// The stream.
        stream: StreamId,
        /// Last admission number drained.
        previous: SeqNo,
        /// Admission number drained after it.
        current: SeqNo,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCeilingExceeded { used, max } => {
                write!(f, "Memory ceiling exceeded: {used} bytes granted of {max}")
            }
            Self::QueueOverCeiling {
                stream,
                used,
                ceiling,
            } => {
                write!(f, "Queue {stream} holds {used} bytes over its {ceiling} byte ceiling")
            }
            Self::LedgerMismatch {
                governor_used,
                queue_ceilings,
                outstanding_batches,
            } => {
                write!(
                    f,
                    "Ledger mismatch: governor reports {governor_used}, queues hold \
                     {queue_ceilings} and open batches {outstanding_batches}"
                )
            }
            Self::WorkerLimitExceeded { active, size } => {
                write!(f, "{active} flush tasks active with {size} slots")
            }
            Self::FifoViolation {
                stream,
                previous,
                current,
            } => {
                write!(f, "FIFO violation on {stream}: drained {current} after {previous}")
            }
        }
    }
}

// ============================================================================
// Flow Checker
// ============================================================================

/// Tracks a pool across a run for property verification.
#[derive(Debug, Default)]
pub struct FlowChecker {
    /// Last admission number drained per stream.
    last_drained: HashMap<StreamId, SeqNo>,
    /// Records drained in total.
    drained_records: u64,
    /// Violations found.
    violations: Vec<PropertyViolation>,
}

impl FlowChecker {
    /// Creates a new checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks memory invariants of `pool`.
    ///
    /// `streams` lists every stream that may have a queue, and
    /// `outstanding_batch_bytes` the bytes of batches taken but not dropped.
    pub fn observe(&mut self, pool: &StreamQueuePool, streams: &[StreamId], outstanding_batch_bytes: u64) {
        let governor = pool.governor();
        let used = governor.used_bytes();
        if used > governor.max_bytes() {
            self.violations.push(PropertyViolation::MemoryCeilingExceeded {
                used,
                max: governor.max_bytes(),
            });
        }

        for stream in streams {
            if let Some(queue) = pool.get(stream) {
                let (queued, ceiling) = (queue.used_bytes(), queue.ceiling_bytes());
                if queued > ceiling {
                    self.violations.push(PropertyViolation::QueueOverCeiling {
                        stream: stream.clone(),
                        used: queued,
                        ceiling,
                    });
                }
            }
        }

        let queue_ceilings = pool.total_ceiling_bytes();
        if used != queue_ceilings + outstanding_batch_bytes {
            self.violations.push(PropertyViolation::LedgerMismatch {
                governor_used: used,
                queue_ceilings,
                outstanding_batches: outstanding_batch_bytes,
            });
        }
    }

    /// Records a drained batch and checks it continues its stream's order.
    pub fn record_drain(&mut self, batch: &Batch) {
        for record in batch.records() {
            let seq = record.seq();
            if let Some(previous) = self.last_drained.insert(batch.stream().clone(), seq) {
                if seq <= previous {
                    self.violations.push(PropertyViolation::FifoViolation {
                        stream: batch.stream().clone(),
                        previous,
                        current: seq,
                    });
                }
            }
            self.drained_records += 1;
        }
    }

    /// Returns the number of records drained so far.
    #[must_use]
    pub const fn drained_records(&self) -> u64 {
        self.drained_records
    }

    /// Returns violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }
}

// ============================================================================
// Engine Checker
// ============================================================================

/// Checks engine diagnostics sampled during a run.
#[derive(Debug, Default)]
pub struct DiagnosticsChecker {
    samples: u64,
    peak_memory_bytes: u64,
    violations: Vec<PropertyViolation>,
}

impl DiagnosticsChecker {
    /// Creates a new checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one diagnostics sample against a pool of `pool_size` slots.
    pub fn record(&mut self, diagnostics: &Diagnostics, pool_size: u32) {
        self.samples += 1;
        self.peak_memory_bytes = self.peak_memory_bytes.max(diagnostics.memory_used_bytes);

        if diagnostics.memory_used_bytes > diagnostics.memory_max_bytes {
            self.violations.push(PropertyViolation::MemoryCeilingExceeded {
                used: diagnostics.memory_used_bytes,
                max: diagnostics.memory_max_bytes,
            });
        }
        if diagnostics.active_workers > u64::from(pool_size) {
            self.violations.push(PropertyViolation::WorkerLimitExceeded {
                active: diagnostics.active_workers,
                size: u64::from(pool_size),
            });
        }
    }

    /// Returns the number of samples taken.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Returns the highest memory usage sampled.
    #[must_use]
    pub const fn peak_memory_bytes(&self) -> u64 {
        self.peak_memory_bytes
    }

    /// Returns violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }
}
