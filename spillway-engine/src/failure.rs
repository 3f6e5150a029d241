//! Flush failure record.
//!
//! The first failed flush marks the run failed. Later failures are only
//! counted. Once set, producers and `close` see the first failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use spillway_core::StreamId;

use crate::error::{EngineError, EngineResult};

/// Failed flush counts for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFailureCounts {
    /// Batches whose flush failed.
    pub failed_batches: u64,
    /// Records in those batches.
    pub failed_records: u64,
}

/// Shared record of flush failures for one engine.
#[derive(Debug, Default)]
pub struct FlushFailure {
    failed: AtomicBool,
    first: Mutex<Option<EngineError>>,
    per_stream: Mutex<HashMap<StreamId, StreamFailureCounts>>,
}

impl FlushFailure {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure. Only the first one is kept for reporting.
    pub fn record(&self, stream: &StreamId, records: u64, error: EngineError) {
        {
            let mut per_stream = self.per_stream.lock();
            let counts = per_stream.entry(stream.clone()).or_default();
            counts.failed_batches += 1;
            counts.failed_records += records;
        }

        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(error);
            self.failed.store(true, Ordering::Release);
        }
    }

    /// Returns true once any flush has failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Returns the first failure, if any.
    #[must_use]
    pub fn first(&self) -> Option<EngineError> {
        self.first.lock().clone()
    }

    /// Returns `Ok` while no flush has failed.
    ///
    /// # Errors
    /// Returns the first recorded failure.
    pub fn check(&self) -> EngineResult<()> {
        if !self.is_failed() {
            return Ok(());
        }
        self.first().map_or(Ok(()), Err)
    }

    /// Returns failure counts for `stream`.
    #[must_use]
    pub fn counts(&self, stream: &StreamId) -> StreamFailureCounts {
        self.per_stream.lock().get(stream).copied().unwrap_or_default()
    }

    /// Returns the number of failed batches across all streams.
    #[must_use]
    pub fn failed_batches(&self) -> u64 {
        self.per_stream.lock().values().map(|c| c.failed_batches).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stream: &StreamId, message: &str) -> EngineError {
        EngineError::FlushFailed {
            stream: stream.clone(),
            records: 1,
            bytes: 10,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let failure = FlushFailure::new();
        let a = StreamId::unqualified("a").unwrap();
        assert!(failure.check().is_ok());

        failure.record(&a, 3, failed(&a, "first"));
        failure.record(&a, 5, failed(&a, "second"));

        assert!(failure.is_failed());
        let err = failure.check().unwrap_err();
        assert!(err.to_string().contains("first"));
        assert_eq!(
            failure.counts(&a),
            StreamFailureCounts {
                failed_batches: 2,
                failed_records: 8,
            }
        );
        assert_eq!(failure.failed_batches(), 2);
    }
}
