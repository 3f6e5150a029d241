//! Flush candidate selection.
//!
//! A pure function over a snapshot of queue sizes, enqueue times and
//! in-flight worker counts. Given the same snapshot it always returns the
//! same stream.
//!
//! # Ordering
//!
//! Streams are ordered by:
//!
//! 1. Effective bytes, descending. Effective bytes are queued bytes minus
//!    `in_flight * batch_estimate_bytes`, so a stream that is already being
//!    drained ranks lower.
//! 2. Last enqueue time, ascending (staler first).
//! 3. [`StreamId::sort_key`], ascending.
//!
//! The first stream that is over the size threshold, or that holds data
//! older than the staleness ceiling, is selected.

use std::cmp::Ordering;

use spillway_core::{Limits, StreamId};

/// Tunables for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Size threshold under normal memory pressure.
    pub flush_threshold_bytes: u64,
    /// Age after which any non-empty stream is flushed.
    pub staleness_ceiling_us: u64,
    /// Memory usage, in parts per million of the maximum, at which the
    /// threshold drops to zero.
    pub eager_flush_ppm: u32,
    /// Bytes assumed to be claimed by each in-flight worker.
    pub batch_estimate_bytes: u64,
}

impl SelectorConfig {
    /// Builds a selector configuration from limits and the flush target's
    /// preferred batch size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_limits(limits: &Limits, batch_estimate_bytes: u64) -> Self {
        Self {
            flush_threshold_bytes: limits.flush_threshold_bytes,
            staleness_ceiling_us: limits.staleness_ceiling_us,
            eager_flush_ppm: (limits.eager_flush_ratio * 1_000_000.0).round() as u32,
            batch_estimate_bytes,
        }
    }
}

/// One stream's state as seen by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// The stream.
    pub stream: StreamId,
    /// Bytes currently queued.
    pub queued_bytes: u64,
    /// Time of the last enqueue. `None` if nothing was ever admitted.
    pub last_enqueue_us: Option<u64>,
    /// Flush workers dispatched and not yet completed.
    pub in_flight: u32,
}

/// Everything selection depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorInput {
    /// Per-stream state.
    pub queues: Vec<QueueSnapshot>,
    /// True once the engine is shutting down.
    pub closing: bool,
    /// Bytes granted on the memory ledger.
    pub memory_used_bytes: u64,
    /// Ledger maximum.
    pub memory_max_bytes: u64,
    /// Current time in microseconds.
    pub now_us: u64,
}

/// Why a stream was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Effective bytes exceeded the threshold.
    Size,
    /// The oldest data exceeded the staleness ceiling.
    Staleness,
}

impl FlushTrigger {
    /// Returns a string representation for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Staleness => "staleness",
        }
    }
}

/// The stream chosen to flush next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushCandidate {
    /// The stream.
    pub stream: StreamId,
    /// Why it was chosen.
    pub trigger: FlushTrigger,
    /// Effective bytes at selection time.
    pub effective_bytes: i64,
}

/// Returns the size threshold for the given snapshot.
///
/// Zero while closing or once memory usage reaches the eager ratio.
#[must_use]
pub fn compute_queue_threshold(config: &SelectorConfig, input: &SelectorInput) -> u64 {
    if input.closing || memory_pressure_reached(config, input) {
        0
    } else {
        config.flush_threshold_bytes
    }
}

fn memory_pressure_reached(config: &SelectorConfig, input: &SelectorInput) -> bool {
    if input.memory_max_bytes == 0 {
        return true;
    }
    // used / max >= ppm / 1e6, in integers.
    u128::from(input.memory_used_bytes) * 1_000_000
        >= u128::from(config.eager_flush_ppm) * u128::from(input.memory_max_bytes)
}

/// Returns queued bytes minus the estimate claimed by in-flight workers.
#[must_use]
pub fn effective_bytes(config: &SelectorConfig, queue: &QueueSnapshot) -> i64 {
    let queued = i64::try_from(queue.queued_bytes).unwrap_or(i64::MAX);
    let estimate = i64::try_from(config.batch_estimate_bytes).unwrap_or(i64::MAX);
    queued.saturating_sub(estimate.saturating_mul(i64::from(queue.in_flight)))
}

/// Returns every stream in selection order.
#[must_use]
pub fn order_streams<'a>(
    config: &SelectorConfig,
    input: &'a SelectorInput,
) -> Vec<(&'a QueueSnapshot, i64)> {
    let mut ordered: Vec<_> = input
        .queues
        .iter()
        .map(|queue| (queue, effective_bytes(config, queue)))
        .collect();
    ordered.sort_by(|(a, a_eff), (b, b_eff)| {
        b_eff
            .cmp(a_eff)
            .then_with(|| compare_staleness(a.last_enqueue_us, b.last_enqueue_us))
            .then_with(|| a.stream.sort_key().cmp(&b.stream.sort_key()))
    });
    ordered
}

/// Older timestamps first; streams that never saw a record last.
fn compare_staleness(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Returns the best stream to flush next, or `None` if nothing is ready.
#[must_use]
pub fn select_next(config: &SelectorConfig, input: &SelectorInput) -> Option<FlushCandidate> {
    let threshold = i64::try_from(compute_queue_threshold(config, input)).unwrap_or(i64::MAX);

    order_streams(config, input)
        .into_iter()
        .find_map(|(queue, effective)| {
            let trigger = if effective > threshold {
                FlushTrigger::Size
            } else if is_stale(config, queue, input.now_us) {
                FlushTrigger::Staleness
            } else {
                return None;
            };
            Some(FlushCandidate {
                stream: queue.stream.clone(),
                trigger,
                effective_bytes: effective,
            })
        })
}

fn is_stale(config: &SelectorConfig, queue: &QueueSnapshot, now_us: u64) -> bool {
    queue.queued_bytes > 0
        && queue
            .last_enqueue_us
            .is_some_and(|last| now_us.saturating_sub(last) > config.staleness_ceiling_us)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::MIB;

    const SECOND: u64 = 1_000_000;
    const NOW: u64 = 3_600 * SECOND;

    fn config() -> SelectorConfig {
        SelectorConfig::from_limits(&Limits::new(), 10 * MIB)
    }

    fn snapshot(name: &str, queued_bytes: u64, age_us: u64, in_flight: u32) -> QueueSnapshot {
        QueueSnapshot {
            stream: StreamId::unqualified(name).unwrap(),
            queued_bytes,
            last_enqueue_us: Some(NOW - age_us),
            in_flight,
        }
    }

    fn input(queues: Vec<QueueSnapshot>) -> SelectorInput {
        SelectorInput {
            queues,
            closing: false,
            memory_used_bytes: 0,
            memory_max_bytes: 1024 * MIB,
            now_us: NOW,
        }
    }

    fn selected(input: &SelectorInput) -> Option<String> {
        select_next(&config(), input).map(|c| c.stream.to_string())
    }

    #[test]
    fn test_threshold_default() {
        assert_eq!(compute_queue_threshold(&config(), &input(vec![])), 10 * MIB);
    }

    #[test]
    fn test_threshold_zero_when_closing() {
        let mut input = input(vec![]);
        input.closing = true;
        assert_eq!(compute_queue_threshold(&config(), &input), 0);
    }

    #[test]
    fn test_threshold_zero_under_memory_pressure() {
        let mut input = input(vec![]);
        input.memory_max_bytes = 100;
        input.memory_used_bytes = 89;
        assert_eq!(compute_queue_threshold(&config(), &input), 10 * MIB);
        input.memory_used_bytes = 90;
        assert_eq!(compute_queue_threshold(&config(), &input), 0);
    }

    #[test]
    fn test_three_stream_scenario() {
        let mut queues = vec![
            snapshot("A", 15 * MIB, 2 * SECOND, 0),
            snapshot("B", 2 * MIB, 360 * SECOND, 0),
            snapshot("C", MIB, SECOND, 0),
        ];

        // A exceeds the size threshold.
        let first = select_next(&config(), &input(queues.clone())).unwrap();
        assert_eq!(first.stream.name(), "A");
        assert_eq!(first.trigger, FlushTrigger::Size);

        // A worker is now draining A; B is stale.
        queues[0].in_flight = 1;
        let second = select_next(&config(), &input(queues.clone())).unwrap();
        assert_eq!(second.stream.name(), "B");
        assert_eq!(second.trigger, FlushTrigger::Staleness);

        // Once B is drained too, C is neither big nor stale.
        queues[1].in_flight = 1;
        queues[1].queued_bytes = 0;
        assert_eq!(selected(&input(queues)), None);
    }

    #[test]
    fn test_in_flight_discount() {
        let queues = vec![
            snapshot("hot", 25 * MIB, SECOND, 1),
            snapshot("warm", 12 * MIB, SECOND, 0),
        ];
        let inp = input(queues.clone());
        let ordered = order_streams(&config(), &inp);
        assert_eq!(ordered[0].0.stream.name(), "hot");
        assert_eq!(ordered[0].1, 15 * MIB as i64);

        let mut queues = queues;
        queues[0].in_flight = 2;
        assert_eq!(selected(&input(queues.clone())).as_deref(), Some("warm"));

        let inp = input(queues);
        let ordered = order_streams(&config(), &inp);
        assert_eq!(ordered[0].0.stream.name(), "warm");
        assert_eq!(ordered[1].1, 5 * MIB as i64);
    }

    #[test]
    fn test_tie_break_prefers_staler() {
        let queues = vec![
            snapshot("fresh", 20 * MIB, SECOND, 0),
            snapshot("older", 20 * MIB, 10 * SECOND, 0),
        ];
        assert_eq!(selected(&input(queues)).as_deref(), Some("older"));
    }

    #[test]
    fn test_tie_break_by_name() {
        let queues = vec![
            snapshot("b", 20 * MIB, SECOND, 0),
            snapshot("a", 20 * MIB, SECOND, 0),
        ];
        assert_eq!(selected(&input(queues)).as_deref(), Some("a"));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let queues = vec![
            snapshot("x", 11 * MIB, 4 * SECOND, 0),
            snapshot("y", 11 * MIB, 4 * SECOND, 0),
            snapshot("z", 30 * MIB, 4 * SECOND, 2),
        ];
        let mut reversed = queues.clone();
        reversed.reverse();

        let expected = selected(&input(queues));
        assert_eq!(expected.as_deref(), Some("x"));
        for _ in 0..10 {
            assert_eq!(selected(&input(reversed.clone())), expected);
        }
    }

    #[test]
    fn test_stale_empty_queue_not_selected() {
        let queues = vec![snapshot("idle", 0, 600 * SECOND, 0)];
        assert_eq!(selected(&input(queues)), None);
    }

    #[test]
    fn test_closing_selects_any_non_empty() {
        let mut input = input(vec![
            snapshot("small", 10, SECOND, 0),
            snapshot("empty", 0, SECOND, 0),
        ]);
        assert_eq!(selected(&input), None);
        input.closing = true;
        assert_eq!(selected(&input).as_deref(), Some("small"));
    }

    #[test]
    fn test_never_enqueued_sorts_last() {
        let mut never = snapshot("never", 0, 0, 0);
        never.last_enqueue_us = None;
        let mut input = input(vec![never, snapshot("seen", 0, SECOND, 0)]);
        input.closing = true;
        let ordered = order_streams(&config(), &input);
        assert_eq!(ordered[0].0.stream.name(), "seen");
        assert_eq!(selected(&input), None);
    }
}
