//! Shard search tasks.
//!
//! A [`ShardSearchTask`] searches one shard for one search and feeds every
//! match into the search's [`DocIdQueue`]. Each task owns a
//! [`DocIdProducer`], so the queue learns about the task's completion on
//! every path: success, failure, cancellation, a panic in the searcher, or
//! the task being dropped without ever running.

use std::any::Any;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::query::NativeQuery;
use crate::queue::{DocIdEntry, DocIdProducer};
use crate::search::events::{CancellationToken, ProgressPublisher, SearchEvent, ShardError};
use crate::search::extraction::ShardRegistry;
use crate::shard::{DocOrdinal, ShardId, ShardSearcherCache};

/// Status of a shard task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not yet running.
    Pending,

    /// Currently executing.
    Running,

    /// Scanned the whole shard.
    Completed,

    /// Failed with a shard error.
    Failed,

    /// Abandoned because the search was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// State shared by all shard tasks of one search.
#[derive(Clone)]
pub struct TaskContext {
    /// Node-wide searcher cache.
    pub cache: Arc<ShardSearcherCache>,

    /// The translated query.
    pub query: Arc<NativeQuery>,

    /// Search-wide hit counter.
    pub hits: Arc<AtomicU64>,

    /// Search cancellation flag.
    pub cancel: CancellationToken,

    /// Pinned searchers for extraction.
    pub registry: Arc<ShardRegistry>,

    /// Hits between two cancellation checks.
    pub cancel_check_interval: usize,

    /// Live progress of the search.
    pub progress: Arc<ProgressPublisher>,

    /// Hits a task collects between two progress reports.
    pub progress_interval: usize,

    /// Event sink of the search.
    pub events: Sender<SearchEvent>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("query", &self.query.to_string())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// What a finished task reports to its search.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// The shard searched.
    pub shard_id: ShardId,

    /// Position of the shard within the search.
    pub shard_index: usize,

    /// Number of shards in the search.
    pub shard_total: usize,

    /// Final status.
    pub status: TaskStatus,

    /// Hits this task produced.
    pub hits: u64,

    /// Time spent executing.
    pub elapsed: Duration,

    /// The failure, for [`TaskStatus::Failed`].
    pub error: Option<ShardError>,
}

/// Searches one shard for one search.
#[derive(Debug)]
pub struct ShardSearchTask {
    shard_id: ShardId,
    shard_index: usize,
    shard_total: usize,
    producer: DocIdProducer,
    status: TaskStatus,
}

impl ShardSearchTask {
    /// Create a task feeding `producer`.
    pub fn new(shard_id: ShardId, shard_index: usize, shard_total: usize, producer: DocIdProducer) -> Self {
        Self {
            shard_id,
            shard_index,
            shard_total,
            producer,
            status: TaskStatus::Pending,
        }
    }

    /// The shard this task searches.
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Run the task to completion.
    ///
    /// The searcher lease is released and the producer completed before this
    /// returns, whatever the outcome.
    pub fn execute(mut self, ctx: &TaskContext) -> TaskReport {
        let start = Instant::now();
        self.status = TaskStatus::Running;

        let (status, hits, error) = if ctx.cancel.is_cancelled() {
            (TaskStatus::Cancelled, 0, None)
        } else {
            self.scan(ctx)
        };
        self.status = status;

        if let Some(error) = &error {
            warn!(shard = %self.shard_id, error = %error, "shard task failed");
            let _ = ctx.events.send(SearchEvent::ShardFailed(error.clone()));
        }

        let Self {
            shard_id,
            shard_index,
            shard_total,
            producer,
            ..
        } = self;
        // A violation is already logged by the queue.
        let _ = producer.complete();

        debug!(shard = %shard_id, ?status, hits, "shard task finished");
        TaskReport {
            shard_id,
            shard_index,
            shard_total,
            status,
            hits,
            elapsed: start.elapsed(),
            error,
        }
    }

    fn scan(&self, ctx: &TaskContext) -> (TaskStatus, u64, Option<ShardError>) {
        let lease = match ctx.cache.acquire(self.shard_id) {
            Ok(lease) => lease,
            Err(e) => return (TaskStatus::Failed, 0, Some(ShardError::from_error(self.shard_id, &e))),
        };
        ctx.registry.pin(&lease);

        let interval = ctx.cancel_check_interval.max(1) as u64;
        let progress_interval = ctx.progress_interval.max(1) as u64;
        let mut hits = 0u64;
        let mut abandoned = false;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut collect = |ordinal: DocOrdinal| {
                if self.producer.put(DocIdEntry::new(self.shard_id, ordinal)).is_err() {
                    abandoned = true;
                    return ControlFlow::Break(());
                }
                hits += 1;
                ctx.hits.fetch_add(1, Ordering::AcqRel);
                if hits % progress_interval == 0 {
                    ctx.progress.publish(self.shard_index, self.shard_total, false);
                }
                if hits % interval == 0 && ctx.cancel.is_cancelled() {
                    abandoned = true;
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            };
            lease.search(&ctx.query, &mut collect)
        }));

        drop(lease);
        match result {
            Ok(Ok(())) if abandoned => (TaskStatus::Cancelled, hits, None),
            Ok(Ok(())) => (TaskStatus::Completed, hits, None),
            Ok(Err(e)) => (TaskStatus::Failed, hits, Some(ShardError::from_error(self.shard_id, &e))),
            Err(payload) => {
                let error = SearchError::shard_search(
                    self.shard_id,
                    format!("searcher panicked: {}", panic_message(payload.as_ref())),
                );
                (TaskStatus::Failed, hits, Some(ShardError::from_error(self.shard_id, &error)))
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
