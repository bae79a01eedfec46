// src/core/executor/stats.rs

use super::Task;
use crate::core::metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by an executor and every task it wraps.
///
/// Ticks are microseconds. `ticks_queued` accumulates the time between a task
/// being scheduled and first polled, `ticks_running` the time from first poll to
/// completion.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    ticks_running: AtomicU64,
    ticks_queued: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_scheduled: AtomicU64,
    outstanding_tasks: AtomicU64,
}

/// A point-in-time copy of `ExecutorStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStatsSnapshot {
    pub ticks_running: u64,
    pub ticks_queued: u64,
    pub tasks_executed: u64,
    pub tasks_scheduled: u64,
    pub outstanding_tasks: u64,
}

/// Keeps a task counted as outstanding until the wrapped future is dropped,
/// whether it ran to completion or not.
struct OutstandingGuard {
    stats: Arc<ExecutorStats>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.stats.outstanding_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ExecutorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `task` as scheduled and returns a task that records its queue and
    /// run time when executed.
    pub fn wrap(self: &Arc<Self>, task: Task) -> Task {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
        self.outstanding_tasks.fetch_add(1, Ordering::AcqRel);
        metrics::EXECUTOR_TASKS_SCHEDULED_TOTAL.inc();

        let guard = OutstandingGuard {
            stats: Arc::clone(self),
        };
        let scheduled_at = Instant::now();

        Box::pin(async move {
            let stats = &guard.stats;
            stats
                .ticks_queued
                .fetch_add(micros_since(scheduled_at), Ordering::Relaxed);

            let started_at = Instant::now();
            task.await;

            stats
                .ticks_running
                .fetch_add(micros_since(started_at), Ordering::Relaxed);
            stats.tasks_executed.fetch_add(1, Ordering::Relaxed);
            metrics::EXECUTOR_TASKS_EXECUTED_TOTAL.inc();
            drop(guard);
        })
    }

    pub fn snapshot(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            ticks_running: self.ticks_running.load(Ordering::Relaxed),
            ticks_queued: self.ticks_queued.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_scheduled: self.tasks_scheduled.load(Ordering::Relaxed),
            outstanding_tasks: self.outstanding_tasks.load(Ordering::Acquire),
        }
    }
}

fn micros_since(instant: Instant) -> u64 {
    u64::try_from(instant.elapsed().as_micros()).unwrap_or(u64::MAX)
}
