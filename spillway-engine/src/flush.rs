//! Flush tasks.
//!
//! Each task drains one batch from one stream, hands it to the flush
//! target, and releases the batch's memory whatever the outcome. The
//! registry entry taken at dispatch is completed when the task ends.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use spillway_core::{FlushId, StreamId};
use spillway_flow::RunningWorkers;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::worker::TaskPanic;

/// Completes a registry entry when the flush task ends, even by panic.
struct RunningGuard<'a> {
    registry: &'a RunningWorkers,
    stream: &'a StreamId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.registry.complete(self.stream);
    }
}

impl EngineShared {
    /// Tracks `stream` and submits one flush task for it. Never blocks.
    ///
    /// The registry entry is taken here rather than when the task starts,
    /// so tasks still waiting for a slot count toward the selector's
    /// in-flight discount.
    pub(crate) fn dispatch(self: &Arc<Self>, stream: StreamId) {
        let flush_id = FlushId::new(self.next_flush_id.fetch_add(1, Ordering::Relaxed));
        self.registry.track(&stream);
        self.stats.flushes_dispatched.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(self);
        let task_stream = stream.clone();
        self.workers.submit(&stream, async move {
            shared.run_flush(task_stream, flush_id).await;
        });
    }

    #[tracing::instrument(skip_all, fields(stream = %stream, flush_id = %flush_id))]
    async fn run_flush(self: Arc<Self>, stream: StreamId, flush_id: FlushId) {
        let _running = RunningGuard {
            registry: &self.registry,
            stream: &stream,
        };
        if self.failure.is_failed() {
            debug!("run already failed, skipping flush");
            return;
        }

        let batch = self.checkpoints.take_batch(
            &self.pool,
            &stream,
            self.target.preferred_batch_size_bytes(),
        );
        if batch.is_empty() {
            debug!("queue already drained");
            return;
        }

        let records = batch.len() as u64;
        let bytes = batch.bytes();
        let start = Instant::now();
        match self.target.flush(&stream, batch.records()).await {
            Ok(()) => {
                self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.stats.records_flushed.fetch_add(records, Ordering::Relaxed);
                self.stats.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
                let released = self.checkpoints.complete(&self.pool, &batch);
                self.stats
                    .states_emitted
                    .fetch_add(released, Ordering::Relaxed);
                debug!(
                    records,
                    bytes,
                    states_released = released,
                    elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "flushed batch"
                );
            }
            Err(err) => {
                error!(records, bytes, error = %err, "flush failed");
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.checkpoints.abort(&batch);
                self.failure.record(
                    &stream,
                    records,
                    EngineError::FlushFailed {
                        stream: stream.clone(),
                        records,
                        bytes,
                        message: err.to_string(),
                    },
                );
            }
        }
        // Memory goes back to the governor here, then the guard completes
        // the registry entry.
        drop(batch);
    }

    /// Records a panicked flush task as a run failure.
    pub(crate) fn record_panic(&self, panic: TaskPanic) {
        error!(stream = %panic.stream, message = %panic.message, "flush worker panicked");
        self.checkpoints.halt();
        self.failure.record(
            &panic.stream,
            0,
            EngineError::WorkerPanicked {
                stream: panic.stream.clone(),
                message: panic.message,
            },
        );
    }
}
