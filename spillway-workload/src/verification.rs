//! Delivery checks run after a workload closes the engine.
//!
//! - Lost records (submitted but never flushed)
//! - Duplicate records (flushed more than once)
//! - Ordering violations (drain order differs from submission order)
//! - Corrupt or misrouted payloads
//! - State messages missing, reordered, or covering the wrong records

use std::collections::HashMap;

use spillway_core::{BufferedRecord, SeqNo, StateScope, StreamId};
use spillway_engine::{EmittedState, FlushedBatch};

use crate::history::History;
use crate::payload::{PayloadError, RecordPayload};

/// A violation of an expected delivery property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A submitted record was never flushed.
    LostRecord {
        /// The stream.
        stream: StreamId,
        /// Per-stream sequence number.
        sequence: u64,
    },

    /// A record was flushed more than once.
    DuplicateRecord {
        /// The stream.
        stream: StreamId,
        /// Per-stream sequence number.
        sequence: u64,
        /// Times it was flushed.
        deliveries: u64,
    },

    /// Records left the queue in a different order than they entered it.
    OrderingViolation {
        /// The stream.
        stream: StreamId,
        /// Sequence drained first.
        previous: u64,
        /// Sequence drained next.
        current: u64,
    },

    /// A batch was not a run of increasing admission numbers.
    BatchOrderViolation {
        /// The stream.
        stream: StreamId,
        /// Admission numbers in the batch.
        seqs: Vec<SeqNo>,
    },

    /// A flushed payload failed to parse.
    CorruptPayload {
        /// The stream.
        stream: StreamId,
        /// Parse failure.
        error: PayloadError,
    },

    /// A payload was flushed under a stream other than its own.
    MisroutedRecord {
        /// The stream it was flushed under.
        stream: StreamId,
        /// Stream index carried in the payload.
        payload_stream_index: u64,
    },

    /// A submitted state was never released.
    MissingState {
        /// The scope.
        scope: StateScope,
        /// Index among that scope's states, in submission order.
        index: usize,
    },

    /// A released state covers a different number of records than submitted.
    StateCountMismatch {
        /// The scope.
        scope: StateScope,
        /// Index among that scope's states.
        index: usize,
        /// Records submitted before it.
        expected: u64,
        /// Records the engine reported.
        actual: u64,
    },

    /// States of one scope were released out of admission order.
    StateOrderViolation {
        /// The scope.
        scope: StateScope,
        /// Admission number released first.
        previous: SeqNo,
        /// Admission number released next.
        current: SeqNo,
    },
}

fn scope_label(scope: &StateScope) -> String {
    match scope {
        StateScope::Global => "<global>".to_string(),
        StateScope::Stream(stream) => stream.to_string(),
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LostRecord { stream, sequence } => {
                write!(f, "Lost record: {stream}#{sequence} was submitted but never flushed")
            }
            Self::DuplicateRecord {
                stream,
                sequence,
                deliveries,
            } => {
                write!(f, "Duplicate record: {stream}#{sequence} flushed {deliveries} times")
            }
            Self::OrderingViolation {
                stream,
                previous,
                current,
            } => {
                write!(
                    f,
                    "Ordering violation: {stream} drained #{current} after #{previous}"
                )
            }
            Self::BatchOrderViolation { stream, seqs } => {
                write!(f, "Batch order violation: {stream} batch seqs {seqs:?}")
            }
            Self::CorruptPayload { stream, error } => {
                write!(f, "Corrupt payload on {stream}: {error}")
            }
            Self::MisroutedRecord {
                stream,
                payload_stream_index,
            } => {
                write!(
                    f,
                    "Misrouted record: payload of stream index {payload_stream_index} flushed under {stream}"
                )
            }
            Self::MissingState { scope, index } => {
                write!(f, "Missing state: {} #{index} never released", scope_label(scope))
            }
            Self::StateCountMismatch {
                scope,
                index,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "State count mismatch: {} #{index} covers {actual} records, expected {expected}",
                    scope_label(scope)
                )
            }
            Self::StateOrderViolation {
                scope,
                previous,
                current,
            } => {
                write!(
                    f,
                    "State order violation: {} released {current} after {previous}",
                    scope_label(scope)
                )
            }
        }
    }
}

/// What the engine delivered, as observed by the target and collector.
#[derive(Debug, Clone, Copy)]
pub struct Delivered<'a> {
    /// Flushed records per stream, in target acceptance order.
    pub records: &'a HashMap<StreamId, Vec<BufferedRecord>>,
    /// Every accepted batch.
    pub batches: &'a [FlushedBatch],
    /// Released states, in release order.
    pub states: &'a [EmittedState],
}

/// Verification runner that checks all properties.
pub struct Verification;

impl Verification {
    /// Runs all verification checks.
    #[must_use]
    pub fn verify(history: &History, delivered: Delivered<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        violations.extend(Self::check_payloads(history, delivered));
        violations.extend(Self::check_batches(delivered));
        violations.extend(Self::check_states(history, delivered));
        violations
    }

    /// Checks loss, duplication, routing and drain order of records.
    ///
    /// Drain order is the admission number order: concurrent batches of one
    /// stream may reach the target in either order, but each batch must be
    /// the next run of the queue.
    #[must_use]
    pub fn check_payloads(history: &History, delivered: Delivered<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (stream, submitted) in history.streams() {
            let mut records: Vec<&BufferedRecord> = delivered
                .records
                .get(stream)
                .map(|r| r.iter().collect())
                .unwrap_or_default();
            records.sort_by_key(|r| r.seq());

            let mut deliveries = vec![0u64; usize::try_from(submitted).unwrap_or(usize::MAX)];
            let mut previous: Option<u64> = None;
            for record in records {
                let payload = match RecordPayload::parse(record.message().data()) {
                    Ok(payload) => payload,
                    Err(error) => {
                        violations.push(Violation::CorruptPayload {
                            stream: stream.clone(),
                            error,
                        });
                        continue;
                    }
                };
                if Some(payload.stream_index) != history.stream_index(stream) {
                    violations.push(Violation::MisroutedRecord {
                        stream: stream.clone(),
                        payload_stream_index: payload.stream_index,
                    });
                    continue;
                }

                if let Some(prev) = previous {
                    if payload.sequence <= prev {
                        violations.push(Violation::OrderingViolation {
                            stream: stream.clone(),
                            previous: prev,
                            current: payload.sequence,
                        });
                    }
                }
                previous = Some(payload.sequence);

                if let Some(count) = usize::try_from(payload.sequence)
                    .ok()
                    .and_then(|i| deliveries.get_mut(i))
                {
                    *count += 1;
                }
            }

            for (sequence, count) in (0u64..).zip(deliveries) {
                match count {
                    0 => violations.push(Violation::LostRecord {
                        stream: stream.clone(),
                        sequence,
                    }),
                    1 => {}
                    n => violations.push(Violation::DuplicateRecord {
                        stream: stream.clone(),
                        sequence,
                        deliveries: n,
                    }),
                }
            }
        }

        violations
    }

    /// Checks that every batch was drained as a run of increasing admission numbers.
    #[must_use]
    pub fn check_batches(delivered: Delivered<'_>) -> Vec<Violation> {
        delivered
            .batches
            .iter()
            .filter(|batch| batch.seqs.windows(2).any(|w| w[0] >= w[1]))
            .map(|batch| Violation::BatchOrderViolation {
                stream: batch.stream.clone(),
                seqs: batch.seqs.clone(),
            })
            .collect()
    }

    /// Checks that each scope's states were released once, in order, each
    /// covering the records submitted before it.
    #[must_use]
    pub fn check_states(history: &History, delivered: Delivered<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut expected: HashMap<&StateScope, Vec<u64>> = HashMap::new();
        for state in history.states() {
            expected
                .entry(&state.scope)
                .or_default()
                .push(state.expected_record_count);
        }
        let mut released: HashMap<&StateScope, Vec<&EmittedState>> = HashMap::new();
        for state in delivered.states {
            released.entry(&state.scope).or_default().push(state);
        }

        for (scope, counts) in expected {
            let emitted = released.remove(scope).unwrap_or_default();
            for pair in emitted.windows(2) {
                if pair[1].seq <= pair[0].seq {
                    violations.push(Violation::StateOrderViolation {
                        scope: scope.clone(),
                        previous: pair[0].seq,
                        current: pair[1].seq,
                    });
                }
            }
            for (index, expected_count) in counts.into_iter().enumerate() {
                match emitted.get(index) {
                    None => violations.push(Violation::MissingState {
                        scope: scope.clone(),
                        index,
                    }),
                    Some(state) if state.record_count != expected_count => {
                        violations.push(Violation::StateCountMismatch {
                            scope: scope.clone(),
                            index,
                            expected: expected_count,
                            actual: state.record_count,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        violations
    }
}
