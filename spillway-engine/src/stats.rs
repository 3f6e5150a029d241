//! Engine statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the gateway, the supervisor and flush tasks.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Messages admitted to a queue.
    pub records_admitted: AtomicU64,
    /// Accounted bytes admitted.
    pub bytes_admitted: AtomicU64,
    /// Batches the target accepted.
    pub batches_flushed: AtomicU64,
    /// Messages the target accepted.
    pub records_flushed: AtomicU64,
    /// Accounted bytes the target accepted.
    pub bytes_flushed: AtomicU64,
    /// Batches the target rejected.
    pub batches_failed: AtomicU64,
    /// Admission attempts that found no memory and backed off.
    pub backpressure_waits: AtomicU64,
    /// Supervisor passes that flushed every stream.
    pub flush_all_escalations: AtomicU64,
    /// Flush tasks dispatched.
    pub flushes_dispatched: AtomicU64,
    /// State messages released to the collector.
    pub states_emitted: AtomicU64,
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct EngineStatsSnapshot {
    pub records_admitted: u64,
    pub bytes_admitted: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub bytes_flushed: u64,
    pub batches_failed: u64,
    pub backpressure_waits: u64,
    pub flush_all_escalations: u64,
    pub flushes_dispatched: u64,
    pub states_emitted: u64,
}

impl EngineStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every counter.
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            records_admitted: self.records_admitted.load(Ordering::Relaxed),
            bytes_admitted: self.bytes_admitted.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            flush_all_escalations: self.flush_all_escalations.load(Ordering::Relaxed),
            flushes_dispatched: self.flushes_dispatched.load(Ordering::Relaxed),
            states_emitted: self.states_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of pool and memory state, logged periodically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Flush tasks waiting for a worker slot.
    pub queued_tasks: u64,
    /// Flush tasks currently running.
    pub active_workers: u64,
    /// Bytes granted on the ledger.
    pub memory_used_bytes: u64,
    /// Ledger maximum.
    pub memory_max_bytes: u64,
    /// Bytes queued across all streams.
    pub queued_bytes: u64,
    /// Known streams.
    pub streams: u64,
}
