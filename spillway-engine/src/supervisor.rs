//! Flush supervisor and diagnostics loops.
//!
//! The supervisor wakes on a fixed period, asks the selector for one stream
//! and dispatches a flush for it. Under heavy memory pressure it skips the
//! selector and dispatches for every non-empty stream. It never waits on a
//! flush.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use spillway_flow::{select_next, QueueSnapshot, SelectorInput};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::EngineShared;

/// Background task running [`EngineShared::supervise_once`] on a period.
pub(crate) async fn supervisor_task(shared: Arc<EngineShared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut interval = tokio::time::interval(shared.config.supervisor_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Flush supervisor shutting down");
                break;
            }
            _ = interval.tick() => {
                shared.supervise_once();
            }
        }
    }
}

/// Background task logging pool and memory diagnostics.
pub(crate) async fn diagnostics_task(shared: Arc<EngineShared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut interval = tokio::time::interval(shared.config.diagnostics_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and there is nothing to report yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Diagnostics task shutting down");
                break;
            }
            _ = interval.tick() => {
                let d = shared.diagnostics();
                info!(
                    queued_tasks = d.queued_tasks,
                    active_workers = d.active_workers,
                    memory_used_bytes = d.memory_used_bytes,
                    memory_max_bytes = d.memory_max_bytes,
                    queued_bytes = d.queued_bytes,
                    streams = d.streams,
                    "buffer diagnostics"
                );
            }
        }
    }
}

impl EngineShared {
    /// Runs one supervisor pass.
    pub(crate) fn supervise_once(self: &Arc<Self>) {
        for panic in self.workers.reap() {
            self.record_panic(panic);
        }
        if self.failure.is_failed() {
            return;
        }

        let ratio = self.governor.usage_ratio();
        if ratio >= self.config.limits.flush_all_ratio {
            self.stats
                .flush_all_escalations
                .fetch_add(1, Ordering::Relaxed);
            info!(
                memory_used_bytes = self.governor.used_bytes(),
                memory_max_bytes = self.governor.max_bytes(),
                "memory nearly exhausted, flushing all streams"
            );
            self.flush_all();
            return;
        }

        let input = self.selector_input();
        if let Some(candidate) = select_next(&self.selector_config, &input) {
            debug!(
                stream = %candidate.stream,
                trigger = candidate.trigger.as_str(),
                effective_bytes = candidate.effective_bytes,
                "selected stream to flush"
            );
            self.dispatch(candidate.stream);
        }
    }

    /// Dispatches a flush for every non-empty stream.
    ///
    /// Streams that already have a task for every worker slot are skipped,
    /// so repeated escalations cannot pile up tasks without bound.
    /// Returns the number of tasks dispatched.
    pub(crate) fn flush_all(self: &Arc<Self>) -> usize {
        let slots = self.workers.size();
        let mut dispatched = 0;
        for stream in self.pool.non_empty_streams() {
            if self.registry.count(&stream) >= slots {
                continue;
            }
            self.dispatch(stream);
            dispatched += 1;
        }
        dispatched
    }

    /// Captures everything the selector needs.
    pub(crate) fn selector_input(&self) -> SelectorInput {
        let in_flight = self.registry.snapshot();
        let queues = self
            .pool
            .snapshot()
            .into_iter()
            .map(|usage| QueueSnapshot {
                in_flight: in_flight.get(&usage.stream).copied().unwrap_or(0),
                stream: usage.stream,
                queued_bytes: usage.queued_bytes,
                last_enqueue_us: usage.last_enqueue_us,
            })
            .collect();

        SelectorInput {
            queues,
            closing: self.is_closing(),
            memory_used_bytes: self.governor.used_bytes(),
            memory_max_bytes: self.governor.max_bytes(),
            now_us: self.now_us(),
        }
    }
}
