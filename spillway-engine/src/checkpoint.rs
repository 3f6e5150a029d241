//! Checkpoint (state message) release.
//!
//! A state message says "the producer has emitted everything up to here".
//! It may only be passed on once everything admitted before it has been
//! flushed. The tracker numbers each state in admission order, holds it,
//! and releases it once the relevant watermark has passed:
//!
//! ```text
//!   stream state s for X:  min(front seq of X's queue, first seq of X's
//!                          in-flight batches) > s
//!   global state g:        the same minimum over every stream > g
//! ```
//!
//! Batches are taken from queues under the tracker lock, so a record is
//! always visible either in its queue or as in flight. Nothing is released
//! after a flush has failed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use spillway_core::{SeqNo, StateScope, StreamId};
use spillway_flow::{Batch, StreamQueuePool};
use tracing::debug;

/// A state message released to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedState {
    /// Which streams the state covers.
    pub scope: StateScope,
    /// Opaque state payload, as submitted.
    pub data: Bytes,
    /// Admission sequence number.
    pub seq: SeqNo,
    /// Records admitted in this scope since the previous state of the same
    /// scope, all of which have now been flushed.
    pub record_count: u64,
}

/// Receives released state messages, in admission order per scope.
///
/// Called while the tracker lock is held; implementations must not block.
pub trait StateCollector: Send + Sync {
    /// Accepts one released state.
    fn emit(&self, state: EmittedState);
}

/// Discards released states.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStateCollector;

impl StateCollector for NoopStateCollector {
    fn emit(&self, _state: EmittedState) {}
}

/// Keeps every released state, for tests and verification.
#[derive(Debug, Default)]
pub struct RecordingStateCollector {
    states: Mutex<Vec<EmittedState>>,
}

impl RecordingStateCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every state released so far, in release order.
    #[must_use]
    pub fn states(&self) -> Vec<EmittedState> {
        self.states.lock().clone()
    }
}

impl StateCollector for RecordingStateCollector {
    fn emit(&self, state: EmittedState) {
        self.states.lock().push(state);
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    /// First sequence number of every batch being flushed, per stream.
    in_flight: HashMap<StreamId, BTreeSet<SeqNo>>,
    /// Admitted states not yet released, by sequence number.
    pending: BTreeMap<SeqNo, EmittedState>,
    /// Set after a flush failure.
    halted: bool,
}

/// Orders state release after the records that precede each state.
pub struct CheckpointTracker {
    state: Mutex<TrackerState>,
    collector: Arc<dyn StateCollector>,
}

impl std::fmt::Debug for CheckpointTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointTracker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CheckpointTracker {
    /// Creates a tracker releasing to `collector`.
    #[must_use]
    pub fn new(collector: Arc<dyn StateCollector>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            collector,
        }
    }

    /// Admits a state message. Returns how many states were released.
    pub fn admit(&self, pool: &StreamQueuePool, scope: StateScope, data: Bytes) -> u64 {
        let mut state = self.state.lock();
        if state.halted {
            return 0;
        }
        let (seq, record_count) = pool.admit_checkpoint(&scope);
        debug!(seq = %seq, record_count, "admitted state");
        state.pending.insert(
            seq,
            EmittedState {
                scope,
                data,
                seq,
                record_count,
            },
        );
        self.release_ready(pool, &mut state)
    }

    /// Takes a batch from `stream` and marks it in flight.
    #[must_use]
    pub fn take_batch(&self, pool: &StreamQueuePool, stream: &StreamId, max_bytes: u64) -> Batch {
        let mut state = self.state.lock();
        let batch = pool.take_batch(stream, max_bytes);
        if let Some(first) = batch.first_seq() {
            state
                .in_flight
                .entry(stream.clone())
                .or_default()
                .insert(first);
        }
        batch
    }

    /// Marks a batch as flushed. Returns how many states were released.
    pub fn complete(&self, pool: &StreamQueuePool, batch: &Batch) -> u64 {
        let mut state = self.state.lock();
        Self::forget(&mut state, batch);
        self.release_ready(pool, &mut state)
    }

    /// Marks a batch as failed. No state is released from now on.
    pub fn abort(&self, batch: &Batch) {
        let mut state = self.state.lock();
        Self::forget(&mut state, batch);
        Self::halt_locked(&mut state);
    }

    /// Stops all further state release.
    pub fn halt(&self) {
        Self::halt_locked(&mut self.state.lock());
    }

    fn halt_locked(state: &mut TrackerState) {
        if !state.halted {
            debug!(pending = state.pending.len(), "halting state release after flush failure");
        }
        state.halted = true;
        state.pending.clear();
    }

    /// Returns the number of states waiting for their watermark.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn forget(state: &mut TrackerState, batch: &Batch) {
        let Some(first) = batch.first_seq() else {
            return;
        };
        if let Some(seqs) = state.in_flight.get_mut(batch.stream()) {
            seqs.remove(&first);
            if seqs.is_empty() {
                state.in_flight.remove(batch.stream());
            }
        }
    }

    fn release_ready(&self, pool: &StreamQueuePool, state: &mut TrackerState) -> u64 {
        if state.halted || state.pending.is_empty() {
            return 0;
        }

        // Lowest unflushed sequence number per stream and overall.
        let mut low: HashMap<StreamId, SeqNo> = HashMap::new();
        for (stream, seq) in pool.front_seqs() {
            lower(&mut low, stream, seq);
        }
        for (stream, seqs) in &state.in_flight {
            if let Some(&seq) = seqs.first() {
                lower(&mut low, stream.clone(), seq);
            }
        }
        let global_low = low.values().min().copied();

        let ready: Vec<SeqNo> = state
            .pending
            .iter()
            .filter(|(seq, pending)| {
                let watermark = match &pending.scope {
                    StateScope::Stream(stream) => low.get(stream).copied(),
                    StateScope::Global => global_low,
                };
                watermark.map_or(true, |w| w > **seq)
            })
            .map(|(seq, _)| *seq)
            .collect();

        let mut released = 0;
        for seq in ready {
            if let Some(emitted) = state.pending.remove(&seq) {
                self.collector.emit(emitted);
                released += 1;
            }
        }
        released
    }
}

fn lower(low: &mut HashMap<StreamId, SeqNo>, stream: StreamId, seq: SeqNo) {
    low.entry(stream)
        .and_modify(|current| *current = (*current).min(seq))
        .or_insert(seq);
}
