//! Flush target abstraction.
//!
//! The flush target is the only call the engine makes out to the rest of
//! the system. It receives one stream's batch in enqueue order and writes
//! it somewhere. Retries and idempotency are the target's business.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use spillway_core::{BufferedRecord, SeqNo, StreamId};

// -----------------------------------------------------------------------------
// FlushTarget Trait
// -----------------------------------------------------------------------------

/// Error returned by a flush target.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FlushTargetError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FlushTargetError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for FlushTargetError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("i/o error", err)
    }
}

/// Sink-specific writer for drained batches.
///
/// # Implementors
///
/// - Destination connectors supply their own uploader
/// - [`SimulatedFlushTarget`] records batches in memory for tests
#[async_trait]
pub trait FlushTarget: Send + Sync {
    /// Writes one batch. Records are in enqueue order for `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be written. The engine does
    /// not retry; the run is marked failed.
    async fn flush(&self, stream: &StreamId, batch: &[BufferedRecord])
        -> Result<(), FlushTargetError>;

    /// Returns the batch size, in accounted bytes, the target prefers.
    fn preferred_batch_size_bytes(&self) -> u64;
}

// -----------------------------------------------------------------------------
// FlushFaultConfig
// -----------------------------------------------------------------------------

/// Fault injection configuration for [`SimulatedFlushTarget`].
#[derive(Debug, Clone, Default)]
pub struct FlushFaultConfig {
    /// Probability that a flush fails (0.0 to 1.0).
    pub flush_fail_rate: f64,
    /// Force the next flush to fail (one-shot).
    pub force_flush_fail: bool,
    /// Force the next flush to panic (one-shot).
    pub force_flush_panic: bool,
    /// Streams whose flushes always fail.
    pub failing_streams: HashSet<StreamId>,
    /// Artificial latency of every flush call.
    pub latency: Duration,
}

impl FlushFaultConfig {
    /// Creates a config with no faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the flush failure rate.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_flush_fail_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.flush_fail_rate = rate;
        self
    }

    /// Forces the next flush to fail (one-shot).
    #[must_use]
    pub const fn with_force_flush_fail(mut self) -> Self {
        self.force_flush_fail = true;
        self
    }

    /// Forces the next flush to panic (one-shot).
    #[must_use]
    pub const fn with_force_flush_panic(mut self) -> Self {
        self.force_flush_panic = true;
        self
    }

    /// Makes every flush of `stream` fail.
    #[must_use]
    pub fn with_failing_stream(mut self, stream: StreamId) -> Self {
        self.failing_streams.insert(stream);
        self
    }

    /// Sets the artificial latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

// -----------------------------------------------------------------------------
// SimulatedFlushTarget
// -----------------------------------------------------------------------------

/// One flush call observed by a [`SimulatedFlushTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBatch {
    /// The stream.
    pub stream: StreamId,
    /// Records in the batch.
    pub records: usize,
    /// Accounted bytes in the batch.
    pub bytes: u64,
    /// Admission sequence numbers, in delivery order.
    pub seqs: Vec<SeqNo>,
}

/// In-memory flush target for deterministic testing.
///
/// Successful batches are recorded per stream in delivery order. Faults
/// are injected from a seeded hash of an operation counter, so runs are
/// reproducible.
///
/// # Cloning
///
/// Clones share the same recorded state and fault configuration.
#[derive(Debug, Clone)]
pub struct SimulatedFlushTarget {
    delivered: Arc<Mutex<HashMap<StreamId, Vec<BufferedRecord>>>>,
    batches: Arc<Mutex<Vec<FlushedBatch>>>,
    fault_config: Arc<Mutex<FlushFaultConfig>>,
    preferred_batch_size_bytes: u64,
    seed: u64,
    counter: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    peak_in_flight: Arc<AtomicU64>,
    failed_calls: Arc<AtomicU64>,
}

impl SimulatedFlushTarget {
    /// Creates a fault-free target.
    #[must_use]
    pub fn new(preferred_batch_size_bytes: u64) -> Self {
        Self::with_faults(preferred_batch_size_bytes, 0, FlushFaultConfig::none())
    }

    /// Creates a target with fault injection enabled.
    #[must_use]
    pub fn with_faults(preferred_batch_size_bytes: u64, seed: u64, config: FlushFaultConfig) -> Self {
        Self {
            delivered: Arc::new(Mutex::new(HashMap::new())),
            batches: Arc::new(Mutex::new(Vec::new())),
            fault_config: Arc::new(Mutex::new(config)),
            preferred_batch_size_bytes,
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            peak_in_flight: Arc::new(AtomicU64::new(0)),
            failed_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the fault configuration for modification.
    pub fn fault_config(&self) -> parking_lot::MutexGuard<'_, FlushFaultConfig> {
        self.fault_config.lock()
    }

    /// Returns the records delivered for `stream`, in delivery order.
    #[must_use]
    pub fn delivered(&self, stream: &StreamId) -> Vec<BufferedRecord> {
        self.delivered.lock().get(stream).cloned().unwrap_or_default()
    }

    /// Returns all delivered records keyed by stream.
    #[must_use]
    pub fn delivered_by_stream(&self) -> HashMap<StreamId, Vec<BufferedRecord>> {
        self.delivered.lock().clone()
    }

    /// Returns the total number of delivered records.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().values().map(Vec::len).sum()
    }

    /// Returns every successful flush call in completion order.
    #[must_use]
    pub fn batches(&self) -> Vec<FlushedBatch> {
        self.batches.lock().clone()
    }

    /// Returns the highest number of concurrent flush calls observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Returns the number of flush calls that failed.
    #[must_use]
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Acquire)
    }

    /// Deterministic RNG based on seed and counter.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self.seed.wrapping_add(counter).wrapping_mul(0x5851_f42d_4c95_7f2d);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Decides the outcome of one call from the fault configuration.
    fn injected_fault(&self, stream: &StreamId) -> Option<FlushTargetError> {
        let mut config = self.fault_config.lock();
        if config.force_flush_panic {
            config.force_flush_panic = false;
            drop(config);
            panic!("simulated flush panic (forced) for {stream}");
        }
        if config.force_flush_fail {
            config.force_flush_fail = false;
            return Some(FlushTargetError::new("simulated flush failure (forced)"));
        }
        if config.failing_streams.contains(stream) {
            return Some(FlushTargetError::new(format!(
                "simulated flush failure for {stream}"
            )));
        }
        let rate = config.flush_fail_rate;
        drop(config);
        self.should_inject_fault(rate)
            .then(|| FlushTargetError::new("simulated flush failure (random)"))
    }

    async fn flush_inner(
        &self,
        stream: &StreamId,
        batch: &[BufferedRecord],
    ) -> Result<(), FlushTargetError> {
        let latency = self.fault_config.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.injected_fault(stream) {
            self.failed_calls.fetch_add(1, Ordering::AcqRel);
            return Err(err);
        }

        self.delivered
            .lock()
            .entry(stream.clone())
            .or_default()
            .extend_from_slice(batch);
        self.batches.lock().push(FlushedBatch {
            stream: stream.clone(),
            records: batch.len(),
            bytes: batch.iter().map(BufferedRecord::size_bytes).sum(),
            seqs: batch.iter().map(BufferedRecord::seq).collect(),
        });
        Ok(())
    }
}

#[async_trait]
impl FlushTarget for SimulatedFlushTarget {
    async fn flush(
        &self,
        stream: &StreamId,
        batch: &[BufferedRecord],
    ) -> Result<(), FlushTargetError> {
        assert!(!batch.is_empty(), "batch must not be empty");

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        let result = self.flush_inner(stream, batch).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn preferred_batch_size_bytes(&self) -> u64 {
        self.preferred_batch_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::Message;

    fn stream(name: &str) -> StreamId {
        StreamId::unqualified(name).unwrap()
    }

    fn batch(name: &str, n: usize) -> Vec<BufferedRecord> {
        (0..n)
            .map(|i| BufferedRecord::new(Message::record(stream(name), format!("r{i}"))))
            .collect()
    }

    #[tokio::test]
    async fn test_records_delivered_in_order() {
        let target = SimulatedFlushTarget::new(1024);
        target.flush(&stream("a"), &batch("a", 3)).await.unwrap();
        target.flush(&stream("a"), &batch("a", 2)).await.unwrap();

        let delivered = target.delivered(&stream("a"));
        assert_eq!(delivered.len(), 5);
        assert_eq!(delivered[3].message().data().as_ref(), b"r0");
        assert_eq!(target.batches().len(), 2);
        assert_eq!(target.preferred_batch_size_bytes(), 1024);
    }

    #[tokio::test]
    async fn test_forced_failure_is_one_shot() {
        let target = SimulatedFlushTarget::with_faults(
            1024,
            42,
            FlushFaultConfig::none().with_force_flush_fail(),
        );

        assert!(target.flush(&stream("a"), &batch("a", 1)).await.is_err());
        assert!(target.flush(&stream("a"), &batch("a", 1)).await.is_ok());
        assert_eq!(target.failed_calls(), 1);
        assert_eq!(target.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_stream() {
        let target = SimulatedFlushTarget::with_faults(
            1024,
            0,
            FlushFaultConfig::none().with_failing_stream(stream("bad")),
        );
        let err = target.flush(&stream("bad"), &batch("bad", 1)).await.unwrap_err();
        assert!(err.message().contains("bad"));
        assert!(target.flush(&stream("good"), &batch("good", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fault_rate_is_deterministic() {
        let outcomes = |seed| async move {
            let target = SimulatedFlushTarget::with_faults(
                1024,
                seed,
                FlushFaultConfig::none().with_flush_fail_rate(0.5),
            );
            let mut results = Vec::new();
            for _ in 0..32 {
                results.push(target.flush(&stream("a"), &batch("a", 1)).await.is_ok());
            }
            results
        };
        assert_eq!(outcomes(7).await, outcomes(7).await);
    }

    #[test]
    fn test_error_source() {
        let io = std::io::Error::other("disk gone");
        let err = FlushTargetError::from(io);
        assert_eq!(err.to_string(), "i/o error");
        assert!(std::error::Error::source(&err).is_some());
    }
}
