//! Bounded flush worker pool.
//!
//! Submission never blocks: every task is spawned at once and waits for a
//! semaphore permit inside its own future, so the backlog lives in the
//! runtime rather than in the caller.
//!
//! ```text
//! submit ──▶ spawn ──▶ [queued] ──acquire permit──▶ [active] ──▶ done
//!                         ▲                            │
//!                         └────── permits (pool size) ─┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spillway_core::StreamId;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::warn;

/// A task that did not finish normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic {
    /// The stream the task was flushing.
    pub stream: StreamId,
    /// Panic payload, if it was a string.
    pub message: String,
}

/// Outcome of waiting for the pool to drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Tasks still running when the wait gave up.
    pub outstanding: usize,
    /// Tasks that panicked.
    pub panics: Vec<TaskPanic>,
}

/// Fixed-size pool of concurrent flush slots.
#[derive(Debug)]
pub struct WorkerPool {
    size: u32,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    task_streams: Mutex<HashMap<tokio::task::Id, StreamId>>,
    queued: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Creates a pool with `size` slots.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    #[must_use]
    pub fn new(size: u32) -> Self {
        assert!(size > 0, "worker pool size must be positive");
        Self {
            size,
            permits: Arc::new(Semaphore::new(size as usize)),
            tasks: Mutex::new(JoinSet::new()),
            task_streams: Mutex::new(HashMap::new()),
            queued: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawns `task` for `stream`. Returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, stream: &StreamId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let queued = Arc::clone(&self.queued);
        let active = Arc::clone(&self.active);
        queued.fetch_add(1, Ordering::AcqRel);

        let mut tasks = self.tasks.lock();
        let handle = tasks.spawn(async move {
            let permit = permits.acquire_owned().await;
            queued.fetch_sub(1, Ordering::AcqRel);
            // The semaphore is never closed.
            let Ok(_permit) = permit else {
                return;
            };
            active.fetch_add(1, Ordering::AcqRel);
            let _active = ActiveGuard(active);
            task.await;
        });
        self.task_streams.lock().insert(handle.id(), stream.clone());
        drop(tasks);
    }

    /// Collects finished tasks without waiting. Returns any panics.
    pub fn reap(&self) -> Vec<TaskPanic> {
        let mut panics = Vec::new();
        loop {
            let next = self.tasks.lock().try_join_next_with_id();
            match next {
                Some(result) => {
                    if let Some(panic) = self.settle(result) {
                        panics.push(panic);
                    }
                }
                None => break,
            }
        }
        panics
    }

    /// Waits for every submitted task, up to `timeout`.
    ///
    /// On timeout the remaining tasks are detached, not cancelled: an upload
    /// is never interrupted midway.
    pub async fn wait_idle(&self, timeout: Duration) -> DrainOutcome {
        // Submit registers a task's stream before releasing the task set
        // lock, so the ids captured here are exactly the tasks taken.
        let (mut tasks, taken_ids) = {
            let mut guard = self.tasks.lock();
            let ids: Vec<tokio::task::Id> = self.task_streams.lock().keys().copied().collect();
            (std::mem::take(&mut *guard), ids)
        };
        let mut outcome = DrainOutcome::default();

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next_with_id().await {
                if let Some(panic) = self.settle(result) {
                    outcome.panics.push(panic);
                }
            }
        })
        .await;

        if drained.is_err() {
            outcome.outstanding = tasks.len();
            warn!(
                outstanding = outcome.outstanding,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "flush tasks still running at drain timeout"
            );
            tasks.detach_all();
            let mut task_streams = self.task_streams.lock();
            for id in &taken_ids {
                task_streams.remove(id);
            }
        }
        outcome
    }

    /// Returns tasks waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Acquire)
    }

    /// Returns tasks holding a slot.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the number of slots.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns submitted tasks not yet collected.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    fn settle(&self, result: Result<(tokio::task::Id, ()), JoinError>) -> Option<TaskPanic> {
        match result {
            Ok((id, ())) => {
                self.task_streams.lock().remove(&id);
                None
            }
            Err(err) => {
                let stream = self
                    .task_streams
                    .lock()
                    .remove(&err.id())
                    .unwrap_or_else(StreamId::global);
                if err.is_panic() {
                    Some(TaskPanic {
                        stream,
                        message: panic_message(err),
                    })
                } else {
                    // Cancelled: only happens when the runtime shuts down.
                    None
                }
            }
        }
    }
}

/// Decrements the active count even if the task panics.
struct ActiveGuard(Arc<AtomicU64>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn stream() -> StreamId {
        StreamId::unqualified("s").unwrap()
    }

    #[tokio::test]
    async fn test_runs_all_tasks() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(&stream(), async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        let outcome = pool.wait_idle(Duration::from_secs(5)).await;
        assert_eq!(outcome, DrainOutcome::default());
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_size() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(&stream(), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle(Duration::from_secs(5)).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_panic_reported() {
        let pool = WorkerPool::new(1);
        pool.submit(&stream(), async {
            panic!("boom");
        });
        let outcome = pool.wait_idle(Duration::from_secs(5)).await;
        assert_eq!(outcome.panics.len(), 1);
        assert_eq!(outcome.panics[0].message, "boom");
        assert_eq!(outcome.panics[0].stream, stream());
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_times_out_without_cancelling() {
        let pool = WorkerPool::new(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        pool.submit(&stream(), async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = pool.wait_idle(Duration::from_secs(1)).await;
        assert_eq!(outcome.outstanding, 1);
        assert!(pool.task_streams.lock().is_empty());

        // The detached task still runs to completion.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_forgets_only_detached_tasks() {
        let pool = WorkerPool::new(2);
        let slow = StreamId::unqualified("slow").unwrap();
        pool.submit(&slow, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        pool.submit(&stream(), async {});

        let outcome = pool.wait_idle(Duration::from_secs(1)).await;
        assert_eq!(outcome.outstanding, 1);
        assert!(pool.task_streams.lock().is_empty());

        // A task submitted after the detach is still tracked.
        pool.submit(&stream(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        assert_eq!(pool.task_streams.lock().len(), 1);
        let outcome = pool.wait_idle(Duration::from_secs(10)).await;
        assert_eq!(outcome, DrainOutcome::default());
        assert!(pool.task_streams.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reap_collects_finished() {
        let pool = WorkerPool::new(2);
        pool.submit(&stream(), async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.reap().is_empty());
        assert_eq!(pool.pending(), 0);
    }
}
