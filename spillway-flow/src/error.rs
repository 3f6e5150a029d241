//! Admission error types.

use spillway_core::StreamId;

/// Admission error type.
///
/// Both variants are fatal to the run. A full queue or an empty ledger is
/// not an error: callers back off and retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// A single record is larger than the whole memory ceiling.
    #[error("record for stream {stream} is {size_bytes} bytes, larger than the {max_bytes} byte memory ceiling")]
    RecordTooLarge {
        /// The stream the record belongs to.
        stream: StreamId,
        /// Estimated record size.
        size_bytes: u64,
        /// Global memory ceiling.
        max_bytes: u64,
    },

    /// Memory never became available within the admission attempt cap.
    #[error("memory exhausted admitting {size_bytes} bytes to stream {stream} after {attempts} attempts")]
    ResourceExhausted {
        /// The stream the record belongs to.
        stream: StreamId,
        /// Estimated record size.
        size_bytes: u64,
        /// Admission attempts made.
        attempts: u32,
    },
}

/// Result type for admission operations.
pub type FlowResult<T> = Result<T, FlowError>;
