//! Metrics collection for the search scheduler.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A snapshot of scheduler metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMetrics {
    /// Searches accepted by `submit`.
    pub searches_submitted: u64,

    /// Searches whose coordinator finished.
    pub searches_completed: u64,

    /// Finished searches that were cancelled or timed out.
    pub searches_cancelled: u64,

    /// Shard tasks that completed normally.
    pub shard_tasks_completed: u64,

    /// Shard tasks that failed.
    pub shard_tasks_failed: u64,

    /// Shard tasks abandoned because of cancellation.
    pub shard_tasks_cancelled: u64,

    /// Hits produced across all searches.
    pub total_hits: u64,

    /// Shard tasks running right now.
    pub running_tasks: usize,

    /// Highest number of shard tasks observed running at once.
    pub peak_running_tasks: usize,

    /// Average search duration.
    pub avg_execution_time: Duration,

    /// Longest search duration.
    pub max_execution_time: Duration,

    /// Shortest search duration.
    pub min_execution_time: Duration,
}

/// Thread-safe collector behind [`SearchMetrics`].
#[derive(Debug)]
pub struct SearchMetricsCollector {
    searches_submitted: AtomicU64,
    searches_completed: AtomicU64,
    searches_cancelled: AtomicU64,
    shard_tasks_completed: AtomicU64,
    shard_tasks_failed: AtomicU64,
    shard_tasks_cancelled: AtomicU64,
    total_hits: AtomicU64,
    running_tasks: AtomicUsize,
    peak_running_tasks: AtomicUsize,
    total_execution_nanos: AtomicU64,
    max_execution_nanos: AtomicU64,
    min_execution_nanos: AtomicU64,
    start_time: Instant,
}

/// How a shard task ended, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl SearchMetricsCollector {
    /// Create a new collector.
    pub fn new() -> Self {
        Self {
            searches_submitted: AtomicU64::new(0),
            searches_completed: AtomicU64::new(0),
            searches_cancelled: AtomicU64::new(0),
            shard_tasks_completed: AtomicU64::new(0),
            shard_tasks_failed: AtomicU64::new(0),
            shard_tasks_cancelled: AtomicU64::new(0),
            total_hits: AtomicU64::new(0),
            running_tasks: AtomicUsize::new(0),
            peak_running_tasks: AtomicUsize::new(0),
            total_execution_nanos: AtomicU64::new(0),
            max_execution_nanos: AtomicU64::new(0),
            min_execution_nanos: AtomicU64::new(u64::MAX),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted search.
    pub fn record_submitted(&self) {
        self.searches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a shard task started running.
    pub fn task_started(&self) {
        let running = self.running_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_running_tasks.fetch_max(running, Ordering::AcqRel);
    }

    /// Record that a shard task stopped running.
    pub fn task_finished(&self, outcome: TaskOutcome, hits: u64) {
        self.running_tasks.fetch_sub(1, Ordering::AcqRel);
        let counter = match outcome {
            TaskOutcome::Completed => &self.shard_tasks_completed,
            TaskOutcome::Failed => &self.shard_tasks_failed,
            TaskOutcome::Cancelled => &self.shard_tasks_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_hits.fetch_add(hits, Ordering::Relaxed);
    }

    /// Record a finished search.
    pub fn record_search(&self, execution_time: Duration, cancelled: bool) {
        self.searches_completed.fetch_add(1, Ordering::Relaxed);
        if cancelled {
            self.searches_cancelled.fetch_add(1, Ordering::Relaxed);
        }

        let nanos = execution_time.as_nanos() as u64;
        self.total_execution_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_execution_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.min_execution_nanos.fetch_min(nanos, Ordering::Relaxed);
    }

    /// Get the current metrics snapshot.
    pub fn snapshot(&self) -> SearchMetrics {
        let completed = self.searches_completed.load(Ordering::Relaxed);
        let total_nanos = self.total_execution_nanos.load(Ordering::Relaxed);
        let avg_nanos = if completed > 0 { total_nanos / completed } else { 0 };

        let min_nanos = self.min_execution_nanos.load(Ordering::Relaxed);
        let min_execution_time = if min_nanos == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_nanos(min_nanos)
        };

        SearchMetrics {
            searches_submitted: self.searches_submitted.load(Ordering::Relaxed),
            searches_completed: completed,
            searches_cancelled: self.searches_cancelled.load(Ordering::Relaxed),
            shard_tasks_completed: self.shard_tasks_completed.load(Ordering::Relaxed),
            shard_tasks_failed: self.shard_tasks_failed.load(Ordering::Relaxed),
            shard_tasks_cancelled: self.shard_tasks_cancelled.load(Ordering::Relaxed),
            total_hits: self.total_hits.load(Ordering::Relaxed),
            running_tasks: self.running_tasks.load(Ordering::Acquire),
            peak_running_tasks: self.peak_running_tasks.load(Ordering::Acquire),
            avg_execution_time: Duration::from_nanos(avg_nanos),
            max_execution_time: Duration::from_nanos(self.max_execution_nanos.load(Ordering::Relaxed)),
            min_execution_time,
        }
    }

    /// Reset all counters except running tasks.
    pub fn reset(&self) {
        self.searches_submitted.store(0, Ordering::Relaxed);
        self.searches_completed.store(0, Ordering::Relaxed);
        self.searches_cancelled.store(0, Ordering::Relaxed);
        self.shard_tasks_completed.store(0, Ordering::Relaxed);
        self.shard_tasks_failed.store(0, Ordering::Relaxed);
        self.shard_tasks_cancelled.store(0, Ordering::Relaxed);
        self.total_hits.store(0, Ordering::Relaxed);
        self.peak_running_tasks
            .store(self.running_tasks.load(Ordering::Acquire), Ordering::Release);
        self.total_execution_nanos.store(0, Ordering::Relaxed);
        self.max_execution_nanos.store(0, Ordering::Relaxed);
        self.min_execution_nanos.store(u64::MAX, Ordering::Relaxed);
    }

    /// Time since the collector was created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for SearchMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_metrics() {
        let collector = SearchMetricsCollector::new();
        collector.record_submitted();
        collector.record_submitted();
        collector.record_search(Duration::from_millis(100), false);
        collector.record_search(Duration::from_millis(50), true);

        let metrics = collector.snapshot();
        assert_eq!(metrics.searches_submitted, 2);
        assert_eq!(metrics.searches_completed, 2);
        assert_eq!(metrics.searches_cancelled, 1);
        assert_eq!(metrics.min_execution_time, Duration::from_millis(50));
        assert_eq!(metrics.max_execution_time, Duration::from_millis(100));
        assert_eq!(metrics.avg_execution_time, Duration::from_millis(75));
    }

    #[test]
    fn test_peak_running_tasks() {
        let collector = SearchMetricsCollector::new();
        collector.task_started();
        collector.task_started();
        collector.task_finished(TaskOutcome::Completed, 5);
        collector.task_started();
        collector.task_finished(TaskOutcome::Failed, 0);
        collector.task_finished(TaskOutcome::Cancelled, 1);

        let metrics = collector.snapshot();
        assert_eq!(metrics.running_tasks, 0);
        assert_eq!(metrics.peak_running_tasks, 2);
        assert_eq!(metrics.shard_tasks_completed, 1);
        assert_eq!(metrics.shard_tasks_failed, 1);
        assert_eq!(metrics.shard_tasks_cancelled, 1);
        assert_eq!(metrics.total_hits, 6);

        collector.reset();
        assert_eq!(collector.snapshot().peak_running_tasks, 0);
    }
}
