//! The search scheduler.
//!
//! Every search gets its own [`DocIdQueue`], a coordinator thread and a set
//! of extraction consumers. Shard tasks of all searches run on one shared
//! rayon pool sized to the node-wide thread ceiling. Before a task is handed
//! to the pool the coordinator takes a permit from the search's
//! [`TaskGate`], which caps how much of the pool one search may occupy.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, after, bounded, select, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::dictionary::DictionaryStore;
use crate::error::{Result, SearchError};
use crate::expression::Expression;
use crate::query::{NativeQuery, QueryTranslator, TranslatedQuery};
use crate::queue::DocIdQueue;
use crate::schema::FieldMetadata;
use crate::search::events::{
    CancellationToken, ProgressPublisher, SearchCanceller, SearchEvent, SearchHandle, SearchOutcome,
};
use crate::search::extraction::{ExtractionStats, HitReceiver, ShardRegistry, run_consumer};
use crate::search::gate::TaskGate;
use crate::search::metrics::{SearchMetrics, SearchMetricsCollector, TaskOutcome};
use crate::search::task::{ShardSearchTask, TaskContext, TaskReport, TaskStatus, panic_message};
use crate::shard::{ShardId, ShardSearcherCache};

/// Runs searches over shards with bounded concurrency.
pub struct SearchScheduler {
    /// Configuration for the scheduler.
    config: SearchConfig,

    /// Node-wide searcher cache.
    cache: Arc<ShardSearcherCache>,

    /// Field metadata used by translation.
    fields: Arc<dyn FieldMetadata>,

    /// Dictionaries used by translation.
    dictionaries: Arc<dyn DictionaryStore>,

    /// Worker pool shared by all searches.
    pool: Arc<ThreadPool>,

    /// Metrics collector.
    metrics: Arc<SearchMetricsCollector>,
}

/// Everything a coordinator thread owns.
struct SearchRun {
    search_id: Uuid,
    started: Instant,
    tasks: Vec<ShardSearchTask>,
    ctx: TaskContext,
    pool: Arc<ThreadPool>,
    metrics: Arc<SearchMetricsCollector>,
    gate: Arc<TaskGate>,
    canceller: SearchCanceller,
    consumers: Vec<JoinHandle<ConsumerResult>>,
    timer_done: Sender<()>,
}

/// Stats of a consumer thread, or the message of the panic that ended it.
type ConsumerResult = std::result::Result<ExtractionStats, String>;

impl SearchScheduler {
    /// Create a scheduler.
    pub fn new(
        config: SearchConfig,
        cache: Arc<ShardSearcherCache>,
        fields: Arc<dyn FieldMetadata>,
        dictionaries: Arc<dyn DictionaryStore>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .thread_name(|i| format!("shard-search-{i}"))
            .panic_handler(|_| error!("shard search job panicked outside the searcher"))
            .build()
            .map_err(|e| SearchError::internal(format!("Failed to create thread pool: {e}")))?;

        Ok(Self {
            config,
            cache,
            fields,
            dictionaries,
            pool: Arc::new(pool),
            metrics: Arc::new(SearchMetricsCollector::new()),
        })
    }

    /// The scheduler configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The searcher cache.
    pub fn cache(&self) -> &Arc<ShardSearcherCache> {
        &self.cache
    }

    /// Translate an expression with this scheduler's field and dictionary lookups.
    pub fn translate(&self, expression: &Expression) -> Result<TranslatedQuery> {
        let translated = QueryTranslator::new(self.fields.as_ref(), self.dictionaries.as_ref())
            .with_max_clause_count(self.config.max_boolean_clause_count)
            .translate(expression)?;
        Ok(translated)
    }

    /// Start a search over the given shards.
    ///
    /// The expression is translated before any shard work starts, so a bad
    /// expression fails here. Values of `field_names` are extracted for every
    /// hit and delivered to `receiver`.
    pub fn submit(
        &self,
        expression: &Expression,
        shard_ids: &[ShardId],
        field_names: &[String],
        receiver: Arc<dyn HitReceiver>,
    ) -> Result<SearchHandle> {
        let translated = self.translate(expression)?;
        self.submit_query(translated.query, shard_ids, field_names, receiver)
    }

    /// Start a search with an already translated query.
    pub fn submit_query(
        &self,
        query: NativeQuery,
        shard_ids: &[ShardId],
        field_names: &[String],
        receiver: Arc<dyn HitReceiver>,
    ) -> Result<SearchHandle> {
        let search_id = Uuid::new_v4();
        let started = Instant::now();

        let mut seen = HashSet::with_capacity(shard_ids.len());
        let shards: Vec<ShardId> = shard_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let shard_total = shards.len();

        let queue = Arc::new(DocIdQueue::new(self.config.max_doc_id_queue_size, shard_total));
        let tasks: Vec<ShardSearchTask> = shards
            .iter()
            .enumerate()
            .map(|(index, shard)| ShardSearchTask::new(*shard, index, shard_total, queue.producer()))
            .collect();

        let (events_tx, events_rx) = unbounded();
        let cancel = CancellationToken::new();
        let gate = Arc::new(TaskGate::new(self.config.effective_threads_per_task()));
        let canceller = SearchCanceller::new(cancel.clone(), Arc::clone(&gate), Arc::clone(&queue));
        let hits = Arc::new(AtomicU64::new(0));
        let registry = Arc::new(ShardRegistry::new());
        let field_names: Arc<[String]> = Arc::from(field_names);

        info!(
            search_id = %search_id,
            shards = shard_total,
            query = %query,
            "submitting search"
        );

        let ctx = TaskContext {
            cache: Arc::clone(&self.cache),
            query: Arc::new(query),
            hits: Arc::clone(&hits),
            cancel,
            registry: Arc::clone(&registry),
            cancel_check_interval: self.config.cancel_check_interval,
            progress: Arc::new(ProgressPublisher::new(Arc::clone(&hits), events_tx.clone())),
            progress_interval: self.config.progress_interval,
            events: events_tx,
        };

        let consumer_count = self.config.extraction_threads_per_search;
        let live_consumers = Arc::new(AtomicUsize::new(consumer_count));
        let consumers = (0..consumer_count)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let field_names = Arc::clone(&field_names);
                let receiver = Arc::clone(&receiver);
                let live = Arc::clone(&live_consumers);
                let canceller = canceller.clone();
                let batch_size = self.config.extraction_batch_size;
                thread::Builder::new()
                    .name(format!("search-extract-{i}"))
                    .spawn(move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_consumer(&queue, &registry, &field_names, receiver.as_ref(), batch_size)
                        }));
                        let remaining = live.fetch_sub(1, Ordering::AcqRel) - 1;
                        result.map_err(|payload| {
                            let message = panic_message(payload.as_ref());
                            error!(search_id = %search_id, error = %message, "extraction consumer panicked");
                            if remaining == 0 {
                                // Nothing drains the queue any more, so producers would block forever.
                                canceller.cancel();
                            }
                            message
                        })
                    })
                    .map_err(SearchError::from)
            })
            .collect::<Result<Vec<_>>>()?;

        let (timer_done, timer_rx) = bounded::<()>(0);
        if let Some(timeout) = self.config.search_timeout {
            spawn_timer(search_id, timeout, timer_rx, canceller.clone())?;
        }

        let run = SearchRun {
            search_id,
            started,
            tasks,
            ctx,
            pool: Arc::clone(&self.pool),
            metrics: Arc::clone(&self.metrics),
            gate,
            canceller: canceller.clone(),
            consumers,
            timer_done,
        };

        let coordinator = thread::Builder::new()
            .name("search-coordinator".to_string())
            .spawn(move || coordinate(run))
            .map_err(SearchError::from)?;

        self.metrics.record_submitted();
        Ok(SearchHandle::new(search_id, canceller, hits, events_rx, coordinator))
    }

    /// Run a search and wait for its outcome.
    pub fn search_blocking(
        &self,
        expression: &Expression,
        shard_ids: &[ShardId],
        field_names: &[String],
        receiver: Arc<dyn HitReceiver>,
    ) -> Result<SearchOutcome> {
        self.submit(expression, shard_ids, field_names, receiver)?.wait()
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> SearchMetrics {
        self.metrics.snapshot()
    }

    /// Reset metrics.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

fn spawn_timer(
    search_id: Uuid,
    timeout: Duration,
    done: Receiver<()>,
    canceller: SearchCanceller,
) -> Result<()> {
    thread::Builder::new()
        .name("search-timer".to_string())
        .spawn(move || {
            select! {
                recv(done) -> _ => {}
                recv(after(timeout)) -> _ => {
                    if canceller.cancel() {
                        warn!(search_id = %search_id, timeout_ms = timeout.as_millis() as u64, "search timed out");
                    }
                }
            }
        })
        .map_err(SearchError::from)?;
    Ok(())
}

/// Dispatch the search's shard tasks and wait for everything to finish.
fn coordinate(run: SearchRun) -> SearchOutcome {
    let SearchRun {
        search_id,
        started,
        tasks,
        ctx,
        pool,
        metrics,
        gate,
        canceller,
        consumers,
        timer_done,
    } = run;

    let shards_total = tasks.len();
    let (report_tx, report_rx) = unbounded::<TaskReport>();

    let mut pending = tasks.into_iter();
    for task in pending.by_ref() {
        // A task that is not dispatched completes its producer when dropped.
        let Some(permit) = gate.acquire() else {
            break;
        };

        let ctx = ctx.clone();
        let metrics = Arc::clone(&metrics);
        let report_tx = report_tx.clone();
        pool.spawn(move || {
            metrics.task_started();
            let report = task.execute(&ctx);
            drop(ctx);
            metrics.task_finished(task_outcome(report.status), report.hits);
            drop(permit);
            let _ = report_tx.send(report);
        });
    }
    let skipped = pending.len();
    drop(pending);
    drop(report_tx);

    let mut reports: Vec<TaskReport> = Vec::with_capacity(shards_total);
    for report in report_rx.iter() {
        ctx.progress.publish(report.shard_index, report.shard_total, true);
        reports.push(report);
    }
    reports.sort_by_key(|r| r.shard_index);

    // Every shard has reported; a late timeout or cancel no longer applies.
    let cancelled = canceller.settle();
    drop(timer_done);

    let mut extraction = ExtractionStats::default();
    let mut extraction_errors = Vec::new();
    for consumer in consumers {
        match consumer.join() {
            Ok(Ok(stats)) => {
                extraction.extracted += stats.extracted;
                extraction.failed += stats.failed;
            }
            Ok(Err(message)) => extraction_errors.push(message),
            Err(payload) => extraction_errors.push(panic_message(payload.as_ref())),
        }
    }

    let outcome = SearchOutcome {
        search_id,
        hit_count: ctx.hits.load(Ordering::Relaxed),
        shards_total,
        shards_searched: reports.iter().filter(|r| r.status == TaskStatus::Completed).count(),
        shard_errors: reports.iter().filter_map(|r| r.error.clone()).collect(),
        cancelled,
        extraction_errors,
        elapsed: started.elapsed(),
    };

    metrics.record_search(outcome.elapsed, cancelled);
    info!(
        search_id = %search_id,
        hits = outcome.hit_count,
        extracted = extraction.extracted,
        shards_searched = outcome.shards_searched,
        shards_failed = outcome.shard_errors.len(),
        shards_skipped = skipped,
        extraction_failures = outcome.extraction_errors.len(),
        cancelled,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "search finished"
    );

    let _ = ctx.events.send(SearchEvent::Completed(outcome.clone()));
    outcome
}

fn task_outcome(status: TaskStatus) -> TaskOutcome {
    match status {
        TaskStatus::Failed => TaskOutcome::Failed,
        TaskStatus::Cancelled | TaskStatus::Pending | TaskStatus::Running => TaskOutcome::Cancelled,
        TaskStatus::Completed => TaskOutcome::Completed,
    }
}
