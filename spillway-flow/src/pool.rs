//! Stream queue pool.
//!
//! Maps stream identifiers to their queues, creating queues lazily on the
//! first record. Every queue's ceiling is paid for by the shared
//! [`MemoryGovernor`], so the sum of ceilings never exceeds the ledger.
//! A queue that drains to empty gives its ceiling back, so streams that
//! went quiet do not hold memory another stream needs.
//!
//! ```text
//!   offer(stream, record)
//!          │
//!          ▼
//!   ┌──────────────┐  rejected   ┌────────────────┐
//!   │ StreamQueue  │────────────▶│ MemoryGovernor │
//!   │  try_push    │◀────────────│ request_grant  │
//!   └──────────────┘ grow_ceiling└────────────────┘
//!          │ grant == 0
//!          ▼
//!   reclaim idle ceilings, grant once more
//!          │ still 0
//!          ▼
//!   record handed back (caller backs off)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use spillway_core::{BufferedRecord, SeqNo, StateScope, StreamId};
use tracing::debug;

use crate::memory::MemoryGovernor;
use crate::queue::StreamQueue;
use crate::sequence::Sequencer;

/// A batch drained from one stream queue.
///
/// The batch holds its bytes on the memory ledger until it is dropped,
/// whether or not the flush that consumed it succeeded.
#[derive(Debug)]
pub struct Batch {
    stream: StreamId,
    records: Vec<BufferedRecord>,
    bytes: u64,
    governor: Arc<MemoryGovernor>,
}

impl Batch {
    /// Returns the stream the batch was drained from.
    #[must_use]
    pub const fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Returns the records in enqueue order.
    #[must_use]
    pub fn records(&self) -> &[BufferedRecord] {
        &self.records
    }

    /// Returns the accounted bytes of the batch.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the queue had nothing to drain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the sequence number of the first record.
    #[must_use]
    pub fn first_seq(&self) -> Option<SeqNo> {
        self.records.first().map(BufferedRecord::seq)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.governor.release(self.bytes);
    }
}

/// Point-in-time usage of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueUsage {
    /// The stream.
    pub stream: StreamId,
    /// Bytes currently queued.
    pub queued_bytes: u64,
    /// Time of the last enqueue, if any.
    pub last_enqueue_us: Option<u64>,
}

/// Lazily populated map of per-stream queues sharing one memory ledger.
#[derive(Debug)]
pub struct StreamQueuePool {
    governor: Arc<MemoryGovernor>,
    queues: RwLock<HashMap<StreamId, Arc<StreamQueue>>>,
    sequencer: Sequencer,
}

impl StreamQueuePool {
    /// Creates an empty pool backed by `governor`.
    #[must_use]
    pub fn new(governor: Arc<MemoryGovernor>) -> Self {
        Self {
            governor,
            queues: RwLock::new(HashMap::new()),
            sequencer: Sequencer::new(),
        }
    }

    /// Returns the shared governor.
    #[must_use]
    pub const fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    /// Returns the queue for `stream`, if one exists.
    #[must_use]
    pub fn get(&self, stream: &StreamId) -> Option<Arc<StreamQueue>> {
        self.queues.read().get(stream).cloned()
    }

    /// Returns the queue for `stream`, creating it on first use.
    ///
    /// A new queue's initial ceiling is one grant from the governor. Under
    /// memory pressure that grant may be zero; the queue then grows through
    /// later grants like any other.
    pub fn get_or_create(&self, stream: &StreamId) -> Arc<StreamQueue> {
        if let Some(queue) = self.get(stream) {
            return queue;
        }

        let mut queues = self.queues.write();
        // Another producer may have won the race.
        if let Some(queue) = queues.get(stream) {
            return Arc::clone(queue);
        }
        let initial = self.governor.request_grant();
        let queue = Arc::new(StreamQueue::new(initial));
        queues.insert(stream.clone(), Arc::clone(&queue));
        debug!(stream = %stream, initial_ceiling = initial, "created stream queue");
        queue
    }

    /// Makes one admission attempt for `record`.
    ///
    /// Requests grants until the record fits or the governor has nothing
    /// left. When the ledger is exhausted, ceilings of empty queues are
    /// reclaimed once before giving up. Granted capacity stays on the
    /// queue either way.
    ///
    /// # Errors
    /// Returns the record when no more memory can be granted right now.
    pub fn offer(
        &self,
        stream: &StreamId,
        record: BufferedRecord,
        now_us: u64,
    ) -> Result<SeqNo, BufferedRecord> {
        let queue = self.get_or_create(stream);
        let mut record = record;
        let mut reclaimed = false;
        loop {
            match queue.try_push(record, &self.sequencer, now_us) {
                Ok(seq) => return Ok(seq),
                Err(rejected) => record = rejected,
            }
            let mut granted = self.governor.request_grant();
            if granted == 0 && !reclaimed {
                reclaimed = true;
                if self.reclaim_idle_headroom() > 0 {
                    granted = self.governor.request_grant();
                }
            }
            if granted == 0 {
                return Err(record);
            }
            queue.grow_ceiling(granted);
        }
    }

    /// Returns the ceilings of all empty queues to the governor.
    ///
    /// Returns the bytes reclaimed.
    pub fn reclaim_idle_headroom(&self) -> u64 {
        let freed: u64 = self
            .queues
            .read()
            .values()
            .map(|queue| queue.release_if_idle())
            .sum();
        if freed > 0 {
            self.governor.release(freed);
            debug!(freed_bytes = freed, "reclaimed idle queue headroom");
        }
        freed
    }

    /// Numbers a checkpoint in admission order.
    ///
    /// Returns the checkpoint's sequence number and the records admitted
    /// since the previous checkpoint of the same scope: that stream's
    /// records for a stream scope, every record for the global scope.
    pub fn admit_checkpoint(&self, scope: &StateScope) -> (SeqNo, u64) {
        match scope {
            StateScope::Global => self.sequencer.next_global_checkpoint(),
            StateScope::Stream(stream) => {
                // Holding the map lock keeps the stream's queue from being
                // created between the lookup and the numbering.
                let queues = self.queues.read();
                match queues.get(stream) {
                    Some(queue) => queue.checkpoint(&self.sequencer),
                    None => (self.sequencer.next_checkpoint(), 0),
                }
            }
        }
    }

    /// Drains up to `max_bytes` from the front of `stream`'s queue.
    ///
    /// Returns an empty batch for unknown or empty streams. Headroom the
    /// queue gives up by draining to empty goes straight back to the
    /// governor; the batch's own bytes follow when it is dropped.
    #[must_use]
    pub fn take_batch(&self, stream: &StreamId, max_bytes: u64) -> Batch {
        let drained = self
            .get(stream)
            .map(|queue| queue.take(max_bytes))
            .unwrap_or_default();
        self.governor.release(drained.released_headroom);
        Batch {
            stream: stream.clone(),
            records: drained.records,
            bytes: drained.bytes,
            governor: Arc::clone(&self.governor),
        }
    }

    /// Returns the usage of every known queue.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueUsage> {
        self.queues
            .read()
            .iter()
            .map(|(stream, queue)| {
                let (queued_bytes, last_enqueue_us) = queue.usage();
                QueueUsage {
                    stream: stream.clone(),
                    queued_bytes,
                    last_enqueue_us,
                }
            })
            .collect()
    }

    /// Returns the streams that currently hold records.
    #[must_use]
    pub fn non_empty_streams(&self) -> Vec<StreamId> {
        let mut streams: Vec<_> = self
            .queues
            .read()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(stream, _)| stream.clone())
            .collect();
        streams.sort();
        streams
    }

    /// Returns the total bytes queued across all streams.
    #[must_use]
    pub fn total_queued_bytes(&self) -> u64 {
        self.queues.read().values().map(|q| q.used_bytes()).sum()
    }

    /// Returns the total records queued across all streams.
    #[must_use]
    pub fn total_queued_records(&self) -> usize {
        self.queues.read().values().map(|q| q.len()).sum()
    }

    /// Returns the sum of all queue ceilings.
    #[must_use]
    pub fn total_ceiling_bytes(&self) -> u64 {
        self.queues.read().values().map(|q| q.ceiling_bytes()).sum()
    }

    /// Returns every queue's unused headroom to the governor.
    ///
    /// Only meaningful once admission has stopped; a later offer simply
    /// requests new grants.
    pub fn release_headroom(&self) -> u64 {
        let freed: u64 = self
            .queues
            .read()
            .values()
            .map(|queue| queue.shrink_to_used())
            .sum();
        if freed > 0 {
            self.governor.release(freed);
        }
        freed
    }

    /// Returns the front sequence number of every non-empty queue.
    #[must_use]
    pub fn front_seqs(&self) -> Vec<(StreamId, SeqNo)> {
        self.queues
            .read()
            .iter()
            .filter_map(|(stream, queue)| queue.front_seq().map(|seq| (stream.clone(), seq)))
            .collect()
    }

    /// Returns the number of known streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.queues.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::Message;

    fn stream(name: &str) -> StreamId {
        StreamId::unqualified(name).unwrap()
    }

    fn record(name: &str, size: u64) -> BufferedRecord {
        BufferedRecord::with_size(Message::record(stream(name), "x"), size)
    }

    fn pool(max: u64, block: u64) -> StreamQueuePool {
        StreamQueuePool::new(Arc::new(MemoryGovernor::new(max, block)))
    }

    #[test]
    fn test_queue_created_lazily_with_one_block() {
        let pool = pool(1000, 100);
        assert_eq!(pool.stream_count(), 0);

        pool.offer(&stream("a"), record("a", 10), 0).unwrap();
        assert_eq!(pool.stream_count(), 1);
        assert_eq!(pool.get(&stream("a")).unwrap().ceiling_bytes(), 100);
        assert_eq!(pool.governor().used_bytes(), 100);
    }

    #[test]
    fn test_release_headroom_returns_unused_grants() {
        let pool = pool(1000, 100);
        pool.offer(&stream("a"), record("a", 30), 0).unwrap();
        pool.offer(&stream("b"), record("b", 100), 0).unwrap();
        assert_eq!(pool.governor().used_bytes(), 200);

        assert_eq!(pool.release_headroom(), 70);
        assert_eq!(pool.governor().used_bytes(), 130);
        assert_eq!(pool.total_ceiling_bytes(), 130);

        // Admission still works afterwards.
        pool.offer(&stream("a"), record("a", 10), 0).unwrap();
        assert_eq!(pool.governor().used_bytes(), 230);
    }

    #[test]
    fn test_drained_streams_do_not_starve_new_stream() {
        let pool = pool(1000, 100);
        let names: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
        for name in &names {
            pool.offer(&stream(name), record(name, 1), 0).unwrap();
        }
        assert_eq!(pool.governor().available_bytes(), 0);
        // Every queue holds a record, so nothing can be reclaimed yet.
        assert!(pool.offer(&stream("fresh"), record("fresh", 50), 0).is_err());

        for name in &names {
            drop(pool.take_batch(&stream(name), 1000));
        }
        assert_eq!(pool.total_queued_bytes(), 0);
        assert_eq!(pool.governor().used_bytes(), 0);

        pool.offer(&stream("fresh"), record("fresh", 50), 0).unwrap();
        assert_eq!(pool.governor().used_bytes(), 100);
    }

    #[test]
    fn test_offer_reclaims_idle_ceilings() {
        let pool = pool(1000, 100);
        for i in 0..10 {
            pool.get_or_create(&stream(&format!("idle{i}")));
        }
        assert_eq!(pool.governor().available_bytes(), 0);

        pool.offer(&stream("busy"), record("busy", 150), 0).unwrap();
        assert_eq!(pool.get(&stream("busy")).unwrap().ceiling_bytes(), 200);
        assert_eq!(pool.governor().used_bytes(), 200);
        assert_eq!(pool.total_ceiling_bytes(), 200);
    }

    #[test]
    fn test_get_or_create_returns_same_queue() {
        let pool = pool(1000, 100);
        let a = pool.get_or_create(&stream("a"));
        let b = pool.get_or_create(&stream("a"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.governor().used_bytes(), 100);
    }

    #[test]
    fn test_record_larger_than_block_admitted() {
        let pool = pool(1000, 100);
        pool.offer(&stream("a"), record("a", 250), 0).unwrap();

        let queue = pool.get(&stream("a")).unwrap();
        assert_eq!(queue.used_bytes(), 250);
        assert_eq!(queue.ceiling_bytes(), 300);
        assert_eq!(pool.governor().used_bytes(), 300);
    }

    #[test]
    fn test_offer_hands_back_when_exhausted() {
        let pool = pool(200, 100);
        pool.offer(&stream("a"), record("a", 100), 0).unwrap();
        pool.offer(&stream("b"), record("b", 100), 0).unwrap();

        let rejected = pool.offer(&stream("a"), record("a", 1), 0).unwrap_err();
        assert_eq!(rejected.size_bytes(), 1);
        assert_eq!(pool.total_queued_bytes(), 200);
    }

    #[test]
    fn test_dropping_batch_releases_memory() {
        let pool = pool(200, 100);
        pool.offer(&stream("a"), record("a", 100), 0).unwrap();
        pool.offer(&stream("b"), record("b", 100), 0).unwrap();
        assert_eq!(pool.governor().available_bytes(), 0);

        let batch = pool.take_batch(&stream("a"), 1000);
        assert_eq!(batch.bytes(), 100);
        // The ledger keeps the bytes while the batch is alive.
        assert_eq!(pool.governor().available_bytes(), 0);
        drop(batch);
        assert_eq!(pool.governor().available_bytes(), 100);

        assert!(pool.offer(&stream("b"), record("b", 50), 0).is_ok());
    }

    #[test]
    fn test_take_batch_unknown_stream_is_empty() {
        let pool = pool(200, 100);
        let batch = pool.take_batch(&stream("missing"), 100);
        assert!(batch.is_empty());
        assert_eq!(batch.first_seq(), None);
    }

    #[test]
    fn test_sequence_numbers_span_streams() {
        let pool = pool(1000, 100);
        let s1 = pool.offer(&stream("a"), record("a", 1), 0).unwrap();
        let s2 = pool.offer(&stream("b"), record("b", 1), 0).unwrap();
        let s3 = pool.offer(&stream("a"), record("a", 1), 0).unwrap();
        assert!(s1 < s2 && s2 < s3);
    }

    #[test]
    fn test_ceilings_never_exceed_ledger() {
        let pool = pool(1000, 64);
        let names = ["a", "b", "c"];
        for i in 0..200_u64 {
            let name = names[(i % 3) as usize];
            let _ = pool.offer(&stream(name), record(name, 7 + i % 50), i);
            if i % 7 == 0 {
                drop(pool.take_batch(&stream(names[(i % 2) as usize]), 90));
            }
            assert!(pool.total_ceiling_bytes() <= pool.governor().used_bytes());
            assert!(pool.governor().used_bytes() <= pool.governor().max_bytes());
            assert!(pool.total_queued_bytes() <= pool.total_ceiling_bytes());
        }
    }

    #[test]
    fn test_checkpoint_counts() {
        let pool = pool(1000, 100);
        pool.offer(&stream("a"), record("a", 1), 0).unwrap();
        pool.offer(&stream("a"), record("a", 1), 0).unwrap();
        pool.offer(&stream("b"), record("b", 1), 0).unwrap();

        let (seq_a, count_a) = pool.admit_checkpoint(&StateScope::Stream(stream("a")));
        assert_eq!(seq_a, SeqNo::new(4));
        assert_eq!(count_a, 2);

        let (_, count_none) = pool.admit_checkpoint(&StateScope::Stream(stream("none")));
        assert_eq!(count_none, 0);
        assert_eq!(pool.stream_count(), 2);

        let (_, global) = pool.admit_checkpoint(&StateScope::Global);
        assert_eq!(global, 3);
    }

    #[test]
    fn test_non_empty_streams_sorted() {
        let pool = pool(1000, 100);
        pool.offer(&stream("c"), record("c", 1), 0).unwrap();
        pool.offer(&stream("a"), record("a", 1), 0).unwrap();
        pool.get_or_create(&stream("b"));
        assert_eq!(pool.non_empty_streams(), vec![stream("a"), stream("c")]);
    }
}
