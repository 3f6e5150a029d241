//! Engine error types.

use spillway_core::StreamId;
use spillway_flow::FlowError;

/// Errors surfaced by the buffering engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Admission failed fatally.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// A flush target call failed. The run must stop.
    #[error("flush failed for stream {stream} ({records} records, {bytes} bytes): {message}")]
    FlushFailed {
        /// The stream whose batch failed.
        stream: StreamId,
        /// Records in the failed batch.
        records: u64,
        /// Accounted bytes in the failed batch.
        bytes: u64,
        /// The target's error message.
        message: String,
    },

    /// A flush task panicked.
    #[error("flush worker for stream {stream} panicked: {message}")]
    WorkerPanicked {
        /// The stream the worker was draining.
        stream: StreamId,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The engine is closing or closed.
    #[error("engine is closed")]
    Closed,

    /// `start` was called twice.
    #[error("engine already started")]
    AlreadyStarted,
}

impl EngineError {
    /// Returns true if the error means data the engine accepted may not
    /// have reached the flush target.
    #[must_use]
    pub const fn is_flush_failure(&self) -> bool {
        matches!(self, Self::FlushFailed { .. } | Self::WorkerPanicked { .. })
    }
}

impl From<spillway_core::Error> for EngineError {
    fn from(err: spillway_core::Error) -> Self {
        Self::InvalidConfig {
            message: err.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
