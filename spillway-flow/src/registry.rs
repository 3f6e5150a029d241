//! Running-worker registry.
//!
//! Counts flush workers per stream between dispatch and completion. The
//! selector uses the counts to discount streams already being drained.

use std::collections::HashMap;

use parking_lot::Mutex;
use spillway_core::StreamId;

/// Per-stream count of in-flight flush workers.
#[derive(Debug, Default)]
pub struct RunningWorkers {
    counts: Mutex<HashMap<StreamId, u32>>,
}

impl RunningWorkers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more worker for `stream`.
    ///
    /// # Panics
    /// Panics if the count for `stream` would overflow.
    pub fn track(&self, stream: &StreamId) {
        let mut counts = self.counts.lock();
        let count = counts.entry(stream.clone()).or_insert(0);
        let Some(next) = count.checked_add(1) else {
            drop(counts);
            panic!("too many flush workers tracked for {stream}");
        };
        *count = next;
    }

    /// Records that one worker for `stream` finished.
    ///
    /// # Panics
    /// Panics if no worker is tracked for `stream`. That means a worker
    /// was completed twice or never tracked, and in-flight counts can no
    /// longer be trusted.
    pub fn complete(&self, stream: &StreamId) {
        let mut counts = self.counts.lock();
        let Some(count) = counts.get_mut(stream) else {
            drop(counts);
            panic!("completed a flush worker for {stream} with none running");
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(stream);
        }
    }

    /// Returns the workers running for `stream`, zero if never tracked.
    #[must_use]
    pub fn count(&self, stream: &StreamId) -> u32 {
        self.counts.lock().get(stream).copied().unwrap_or(0)
    }

    /// Returns the workers running across all streams.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.lock().values().map(|&c| u64::from(c)).sum()
    }

    /// Returns a copy of every non-zero count.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<StreamId, u32> {
        self.counts.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> StreamId {
        StreamId::unqualified(name).unwrap()
    }

    #[test]
    fn test_track_and_complete() {
        let registry = RunningWorkers::new();
        assert_eq!(registry.count(&stream("a")), 0);

        registry.track(&stream("a"));
        registry.track(&stream("a"));
        registry.track(&stream("b"));
        assert_eq!(registry.count(&stream("a")), 2);
        assert_eq!(registry.total(), 3);

        registry.complete(&stream("a"));
        assert_eq!(registry.count(&stream("a")), 1);
        registry.complete(&stream("a"));
        assert_eq!(registry.count(&stream("a")), 0);
        assert!(!registry.snapshot().contains_key(&stream("a")));
    }

    #[test]
    #[should_panic(expected = "with none running")]
    fn test_complete_twice_panics() {
        let registry = RunningWorkers::new();
        registry.track(&stream("A"));
        registry.complete(&stream("A"));
        registry.complete(&stream("A"));
    }

    #[test]
    #[should_panic(expected = "with none running")]
    fn test_complete_untracked_panics() {
        let registry = RunningWorkers::new();
        registry.complete(&stream("never"));
    }

    #[test]
    #[should_panic(expected = "too many flush workers")]
    fn test_track_overflow_panics() {
        let registry = RunningWorkers::new();
        registry.counts.lock().insert(stream("s"), u32::MAX);
        registry.track(&stream("s"));
    }

    #[test]
    fn test_concurrent_track_complete() {
        let registry = std::sync::Arc::new(RunningWorkers::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.track(&stream("s"));
                        registry.complete(&stream("s"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.total(), 0);
    }
}
