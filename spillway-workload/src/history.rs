//! What the workload submitted, for verification after close.

use std::collections::BTreeMap;

use spillway_core::{StateScope, StreamId};

/// A state message as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedState {
    /// The scope.
    pub scope: StateScope,
    /// Records of the scope admitted since the previous state of that scope.
    pub expected_record_count: u64,
}

/// Submission history of one workload run.
#[derive(Debug, Default)]
pub struct History {
    /// Records submitted per stream. Sequences run `0..count`.
    records: BTreeMap<StreamId, u64>,
    /// Stream index of each stream.
    indices: BTreeMap<StreamId, u64>,
    /// States in submission order.
    states: Vec<SubmittedState>,
    /// Records since the previous state, per stream.
    since_stream_state: BTreeMap<StreamId, u64>,
    /// Records since the previous global state.
    since_global_state: u64,
    /// Payload bytes submitted.
    payload_bytes: u64,
}

impl History {
    /// Creates a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record and returns its per-stream sequence number.
    pub fn record_submit(&mut self, stream: &StreamId, stream_index: u64, payload_bytes: u64) -> u64 {
        self.indices.entry(stream.clone()).or_insert(stream_index);
        let count = self.records.entry(stream.clone()).or_insert(0);
        let sequence = *count;
        *count += 1;
        *self.since_stream_state.entry(stream.clone()).or_insert(0) += 1;
        self.since_global_state += 1;
        self.payload_bytes += payload_bytes;
        sequence
    }

    /// Registers a state message.
    pub fn state_submit(&mut self, scope: StateScope) {
        let expected_record_count = match &scope {
            StateScope::Global => std::mem::take(&mut self.since_global_state),
            StateScope::Stream(stream) => self.since_stream_state.remove(stream).unwrap_or(0),
        };
        self.states.push(SubmittedState {
            scope,
            expected_record_count,
        });
    }

    /// Returns the number of records submitted to `stream`.
    #[must_use]
    pub fn record_count(&self, stream: &StreamId) -> u64 {
        self.records.get(stream).copied().unwrap_or(0)
    }

    /// Returns every stream with its submitted record count.
    pub fn streams(&self) -> impl Iterator<Item = (&StreamId, u64)> {
        self.records.iter().map(|(stream, count)| (stream, *count))
    }

    /// Returns the index a stream's payloads carry.
    #[must_use]
    pub fn stream_index(&self, stream: &StreamId) -> Option<u64> {
        self.indices.get(stream).copied()
    }

    /// Returns states in submission order.
    #[must_use]
    pub fn states(&self) -> &[SubmittedState] {
        &self.states
    }

    /// Returns the total number of records submitted.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.records.values().sum()
    }

    /// Returns the payload bytes submitted.
    #[must_use]
    pub const fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_counts_reset_per_scope() {
        let a = StreamId::unqualified("a").unwrap();
        let b = StreamId::unqualified("b").unwrap();
        let mut history = History::new();

        assert_eq!(history.record_submit(&a, 0, 10), 0);
        assert_eq!(history.record_submit(&a, 0, 10), 1);
        assert_eq!(history.record_submit(&b, 1, 10), 0);
        history.state_submit(StateScope::Stream(a.clone()));
        history.record_submit(&a, 0, 10);
        history.state_submit(StateScope::Global);
        history.state_submit(StateScope::Stream(a.clone()));

        let counts: Vec<u64> = history
            .states()
            .iter()
            .map(|s| s.expected_record_count)
            .collect();
        assert_eq!(counts, vec![2, 4, 1]);
        assert_eq!(history.record_count(&a), 3);
        assert_eq!(history.total_records(), 4);
        assert_eq!(history.payload_bytes(), 40);
    }
}
