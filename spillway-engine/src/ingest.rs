//! Ingestion gateway.
//!
//! Records are admitted one at a time. When the stream's queue is full and
//! the governor has nothing left to grant, the producer waits here with
//! exponential backoff until a flush frees memory. This wait is the
//! engine's only backpressure mechanism; records are never dropped.

use std::sync::atomic::Ordering;

use spillway_core::{BufferedRecord, Message};
use spillway_flow::FlowError;
use tracing::{debug, warn};

use crate::engine::EngineShared;
use crate::error::{EngineError, EngineResult};

impl EngineShared {
    /// Routes one message to its queue or to the checkpoint tracker.
    pub(crate) async fn submit(&self, message: Message) -> EngineResult<()> {
        self.failure.check()?;
        if self.is_closing() {
            return Err(EngineError::Closed);
        }

        match message {
            Message::State { scope, data } => {
                let released = self.checkpoints.admit(&self.pool, scope, data);
                self.stats
                    .states_emitted
                    .fetch_add(released, Ordering::Relaxed);
                Ok(())
            }
            record @ Message::Record { .. } => self.enqueue(record).await,
        }
    }

    /// Admits a data record, blocking while memory is exhausted.
    async fn enqueue(&self, message: Message) -> EngineResult<()> {
        let stream = message.stream_id();
        let mut record = BufferedRecord::new(message);
        let size_bytes = record.size_bytes();

        let max_bytes = self.governor.max_bytes();
        if size_bytes > max_bytes {
            return Err(FlowError::RecordTooLarge {
                stream,
                size_bytes,
                max_bytes,
            }
            .into());
        }

        let max_attempts = self.config.limits.max_admission_attempts;
        let mut backoff = self.config.admission_backoff_min;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.pool.offer(&stream, record, self.now_us()) {
                Ok(_) => {
                    self.stats.records_admitted.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_admitted
                        .fetch_add(size_bytes, Ordering::Relaxed);
                    return Ok(());
                }
                Err(rejected) => record = rejected,
            }

            if attempts >= max_attempts {
                warn!(stream = %stream, size_bytes, attempts, "giving up on admission, memory exhausted");
                return Err(FlowError::ResourceExhausted {
                    stream,
                    size_bytes,
                    attempts,
                }
                .into());
            }
            // A failed run will never free memory for us.
            self.failure.check()?;

            if attempts == 1 {
                debug!(
                    stream = %stream,
                    size_bytes,
                    memory_used = self.governor.used_bytes(),
                    "admission blocked, waiting for memory"
                );
            }
            self.stats.backpressure_waits.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.admission_backoff_max);
        }
    }
}
