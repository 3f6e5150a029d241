//! Memory-bounded FIFO queue for one stream.
//!
//! A queue owns its records, the exact sum of their sizes, a ceiling that
//! only grows through memory grants, and the time of its last enqueue.
//! Admission never truncates: a record that does not fit is handed back.

use std::collections::VecDeque;

use parking_lot::Mutex;
use spillway_core::{BufferedRecord, SeqNo};

use crate::sequence::Sequencer;

/// Mutable queue state, guarded by one lock.
#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<BufferedRecord>,
    used_bytes: u64,
    ceiling_bytes: u64,
    last_enqueue_us: Option<u64>,
    records_since_checkpoint: u64,
}

/// A memory-accounted FIFO of buffered records.
///
/// Safe for many producers and many consumers. Every record is handed to
/// exactly one [`StreamQueue::take`] call.
#[derive(Debug)]
pub struct StreamQueue {
    state: Mutex<QueueState>,
}

/// Records removed from the front of a queue.
#[derive(Debug, Default)]
pub struct Drained {
    /// Records in enqueue order.
    pub records: Vec<BufferedRecord>,
    /// Sum of the records' accounted sizes.
    pub bytes: u64,
    /// Unused ceiling given up because the queue is now empty.
    pub released_headroom: u64,
}

impl StreamQueue {
    /// Creates an empty queue with the given initial ceiling.
    #[must_use]
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ceiling_bytes,
                ..QueueState::default()
            }),
        }
    }

    /// Appends a record if it fits under the ceiling.
    ///
    /// On success the record is stamped with the next number from
    /// `sequencer` and with `now_us`. The number is drawn while the queue
    /// lock is held.
    ///
    /// # Errors
    /// Returns the record unchanged when it would push usage above the ceiling.
    pub fn try_push(
        &self,
        mut record: BufferedRecord,
        sequencer: &Sequencer,
        now_us: u64,
    ) -> Result<SeqNo, BufferedRecord> {
        let mut state = self.state.lock();
        let Some(new_used) = state.used_bytes.checked_add(record.size_bytes()) else {
            return Err(record);
        };
        if new_used > state.ceiling_bytes {
            return Err(record);
        }

        let seq = sequencer.next_record();
        record.stamp(seq, now_us);
        state.records.push_back(record);
        state.used_bytes = new_used;
        state.last_enqueue_us = Some(now_us);
        state.records_since_checkpoint += 1;
        Ok(seq)
    }

    /// Numbers a checkpoint for this stream.
    ///
    /// Returns its sequence number and the records admitted since the
    /// previous checkpoint, and resets that count.
    pub fn checkpoint(&self, sequencer: &Sequencer) -> (SeqNo, u64) {
        let mut state = self.state.lock();
        let seq = sequencer.next_checkpoint();
        (seq, std::mem::take(&mut state.records_since_checkpoint))
    }

    /// Raises the ceiling by a granted amount.
    pub fn grow_ceiling(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.ceiling_bytes = state.ceiling_bytes.saturating_add(bytes);
    }

    /// Lowers the ceiling to current usage. Returns the bytes given up.
    pub fn shrink_to_used(&self) -> u64 {
        let mut state = self.state.lock();
        let freed = state.ceiling_bytes - state.used_bytes;
        state.ceiling_bytes = state.used_bytes;
        freed
    }

    /// Removes records from the front, up to `max_bytes` in total.
    ///
    /// The first record is always taken, even when it alone exceeds
    /// `max_bytes`, so an oversized record can never wedge the queue.
    /// Usage and ceiling both shrink by the drained bytes: the caller now
    /// owns that share of the ledger and returns it to the governor. When
    /// the queue ends up empty its whole ceiling is given up as well and
    /// reported in [`Drained::released_headroom`].
    pub fn take(&self, max_bytes: u64) -> Drained {
        let mut state = self.state.lock();
        let mut drained = Drained::default();

        while let Some(front) = state.records.front() {
            let size = front.size_bytes();
            if !drained.records.is_empty() && drained.bytes + size > max_bytes {
                break;
            }
            let Some(record) = state.records.pop_front() else {
                break;
            };
            drained.bytes += size;
            drained.records.push(record);
        }

        debug_assert!(drained.bytes <= state.used_bytes);
        state.used_bytes -= drained.bytes;
        state.ceiling_bytes -= drained.bytes;
        if state.records.is_empty() {
            drained.released_headroom = std::mem::take(&mut state.ceiling_bytes);
        }
        drained
    }

    /// Gives up the ceiling of an empty queue. Returns the bytes given up.
    ///
    /// A queue holding records keeps its ceiling.
    pub fn release_if_idle(&self) -> u64 {
        let mut state = self.state.lock();
        if state.records.is_empty() {
            std::mem::take(&mut state.ceiling_bytes)
        } else {
            0
        }
    }

    /// Returns the exact sum of queued record sizes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used_bytes
    }

    /// Returns the current ceiling.
    #[must_use]
    pub fn ceiling_bytes(&self) -> u64 {
        self.state.lock().ceiling_bytes
    }

    /// Returns the number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if no records are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Returns the time of the last successful enqueue.
    #[must_use]
    pub fn last_enqueue_us(&self) -> Option<u64> {
        self.state.lock().last_enqueue_us
    }

    /// Returns the sequence number of the oldest queued record.
    #[must_use]
    pub fn front_seq(&self) -> Option<SeqNo> {
        self.state.lock().records.front().map(BufferedRecord::seq)
    }

    /// Returns usage and last enqueue time under one lock.
    #[must_use]
    pub fn usage(&self) -> (u64, Option<u64>) {
        let state = self.state.lock();
        (state.used_bytes, state.last_enqueue_us)
    }
}
