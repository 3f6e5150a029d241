//! Messages accepted by the engine and their buffered form.
//!
//! The engine never interprets payloads. It only needs the stream a
//! message belongs to and an estimate of its size in bytes.

use bytes::Bytes;

use crate::types::{SeqNo, StreamId};

/// Fixed per-message overhead added to every size estimate.
///
/// Covers the message envelope and queue bookkeeping so that a flood of
/// empty payloads still consumes budget.
pub const MESSAGE_OVERHEAD_BYTES: u64 = 64;

/// Which streams a state message describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// Progress for a single stream.
    Stream(StreamId),
    /// Progress for every stream at once.
    Global,
}

/// A message submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A data record for one stream.
    Record {
        /// The stream the record belongs to.
        stream: StreamId,
        /// Opaque serialized record.
        data: Bytes,
    },
    /// A checkpoint describing how far the producer has got.
    State {
        /// Which streams the checkpoint covers.
        scope: StateScope,
        /// Opaque serialized state.
        data: Bytes,
    },
}

impl Message {
    /// Creates a data record.
    #[must_use]
    pub fn record(stream: StreamId, data: impl Into<Bytes>) -> Self {
        Self::Record {
            stream,
            data: data.into(),
        }
    }

    /// Creates a state message scoped to one stream.
    #[must_use]
    pub fn stream_state(stream: StreamId, data: impl Into<Bytes>) -> Self {
        Self::State {
            scope: StateScope::Stream(stream),
            data: data.into(),
        }
    }

    /// Creates a global state message.
    #[must_use]
    pub fn global_state(data: impl Into<Bytes>) -> Self {
        Self::State {
            scope: StateScope::Global,
            data: data.into(),
        }
    }

    /// Returns the stream whose queue buffers this message.
    ///
    /// Global state is routed to [`StreamId::global`].
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Record { stream, .. }
            | Self::State {
                scope: StateScope::Stream(stream),
                ..
            } => stream.clone(),
            Self::State {
                scope: StateScope::Global,
                ..
            } => StreamId::global(),
        }
    }

    /// Returns the payload.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        match self {
            Self::Record { data, .. } | Self::State { data, .. } => data,
        }
    }

    /// Returns true for state messages.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    /// Estimates the in-memory footprint of this message.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> u64 {
        let stream_len = match self {
            Self::Record { stream, .. }
            | Self::State {
                scope: StateScope::Stream(stream),
                ..
            } => stream.encoded_len(),
            Self::State {
                scope: StateScope::Global,
                ..
            } => 0,
        };
        MESSAGE_OVERHEAD_BYTES + (self.data().len() + stream_len) as u64
    }
}

/// A message held in a stream queue.
///
/// `size_bytes` is fixed at enqueue time and is what the queue and the
/// memory ledger account with. It is never recomputed from content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRecord {
    message: Message,
    size_bytes: u64,
    seq: SeqNo,
    enqueued_at_us: u64,
}

impl BufferedRecord {
    /// Wraps a message with its estimated size. The record is not yet stamped.
    #[must_use]
    pub fn new(message: Message) -> Self {
        let size_bytes = message.estimated_size_bytes();
        Self::with_size(message, size_bytes)
    }

    /// Wraps a message with an explicit size.
    #[must_use]
    pub const fn with_size(message: Message, size_bytes: u64) -> Self {
        Self {
            message,
            size_bytes,
            seq: SeqNo::new(0),
            enqueued_at_us: 0,
        }
    }

    /// Records the admission sequence number and time.
    pub fn stamp(&mut self, seq: SeqNo, enqueued_at_us: u64) {
        self.seq = seq;
        self.enqueued_at_us = enqueued_at_us;
    }

    /// Returns the buffered message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Consumes the record, returning the message.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Returns the accounted size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns the admission sequence number.
    #[must_use]
    pub const fn seq(&self) -> SeqNo {
        self.seq
    }

    /// Returns the admission time in microseconds.
    #[must_use]
    pub const fn enqueued_at_us(&self) -> u64 {
        self.enqueued_at_us
    }
}
