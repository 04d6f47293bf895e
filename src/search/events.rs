//! Search handles, events and outcomes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SearchError};
use crate::queue::DocIdQueue;
use crate::search::gate::TaskGate;
use crate::shard::ShardId;

/// Shared cancellation flag of one search.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation. Returns true if this call triggered it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Whether cancellation was triggered.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Category of a per-shard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardErrorKind {
    /// The shard could not be opened.
    Unavailable,
    /// The shard failed while being searched.
    Search,
}

/// A failure confined to one shard of a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardError {
    /// The failing shard.
    pub shard_id: ShardId,

    /// What went wrong.
    pub kind: ShardErrorKind,

    /// Human readable cause.
    pub message: String,
}

impl ShardError {
    /// Build from a search error raised while working on `shard_id`.
    pub fn from_error(shard_id: ShardId, error: &SearchError) -> Self {
        let (kind, message) = match error {
            SearchError::ShardUnavailable { reason, .. } => (ShardErrorKind::Unavailable, reason.clone()),
            SearchError::ShardSearch { reason, .. } => (ShardErrorKind::Search, reason.clone()),
            other => (ShardErrorKind::Search, other.to_string()),
        };
        Self {
            shard_id,
            kind,
            message,
        }
    }
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ShardErrorKind::Unavailable => write!(f, "shard {} unavailable: {}", self.shard_id, self.message),
            ShardErrorKind::Search => write!(f, "shard {} search failed: {}", self.shard_id, self.message),
        }
    }
}

/// Final result of a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    /// Search id.
    pub search_id: Uuid,

    /// Hits produced by all shards.
    pub hit_count: u64,

    /// Shards the search was submitted over.
    pub shards_total: usize,

    /// Shards that finished without error or cancellation.
    pub shards_searched: usize,

    /// Per-shard failures.
    pub shard_errors: Vec<ShardError>,

    /// Whether the search was cancelled or timed out.
    pub cancelled: bool,

    /// Extraction consumers that died, with their panic messages.
    pub extraction_errors: Vec<String>,

    /// Wall-clock duration.
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl SearchOutcome {
    /// Whether every shard was searched.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.shard_errors.is_empty()
            && self.extraction_errors.is_empty()
            && self.shards_searched == self.shards_total
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Events published while a search runs.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// Search-wide hit count so far. Sent while shards are scanned and
    /// whenever a shard task finishes.
    Progress {
        shard_index: usize,
        shard_total: usize,
        hits: u64,
    },

    /// A shard failed.
    ShardFailed(ShardError),

    /// The search finished.
    Completed(SearchOutcome),
}

/// Caller side of a running search.
#[derive(Debug)]
pub struct SearchHandle {
    id: Uuid,
    canceller: SearchCanceller,
    hits: Arc<AtomicU64>,
    events: Receiver<SearchEvent>,
    coordinator: JoinHandle<SearchOutcome>,
}

impl SearchHandle {
    pub(crate) fn new(
        id: Uuid,
        canceller: SearchCanceller,
        hits: Arc<AtomicU64>,
        events: Receiver<SearchEvent>,
        coordinator: JoinHandle<SearchOutcome>,
    ) -> Self {
        Self {
            id,
            canceller,
            hits,
            events,
            coordinator,
        }
    }

    /// Search id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the search.
    ///
    /// Dispatch stops, running shard tasks abandon their scans at the next
    /// check and queued hits are discarded. Has no effect once every shard
    /// task has reported.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Whether the search was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// Hits produced so far. Approximate while the search runs.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// The event stream.
    pub fn events(&self) -> &Receiver<SearchEvent> {
        &self.events
    }

    /// Whether the search has finished.
    pub fn is_finished(&self) -> bool {
        self.coordinator.is_finished()
    }

    /// Block until the search finishes.
    pub fn wait(self) -> Result<SearchOutcome> {
        self.coordinator
            .join()
            .map_err(|_| SearchError::internal(format!("Coordinator of search {} panicked", self.id)))
    }
}

/// Cancels one search: flags its token, closes its gate and terminates its queue.
#[derive(Debug, Clone)]
pub(crate) struct SearchCanceller {
    token: CancellationToken,
    gate: Arc<TaskGate>,
    queue: Arc<DocIdQueue>,
    settled: Arc<Mutex<bool>>,
}

impl SearchCanceller {
    pub(crate) fn new(token: CancellationToken, gate: Arc<TaskGate>, queue: Arc<DocIdQueue>) -> Self {
        Self {
            token,
            gate,
            queue,
            settled: Arc::new(Mutex::new(false)),
        }
    }

    /// Cancel unless the search already settled. Returns true if this call cancelled it.
    pub(crate) fn cancel(&self) -> bool {
        let settled = self.settled.lock();
        if *settled || !self.token.cancel() {
            return false;
        }
        self.gate.close();
        self.queue.terminate();
        true
    }

    /// Mark every shard task as reported and return whether the search was cancelled first.
    pub(crate) fn settle(&self) -> bool {
        let mut settled = self.settled.lock();
        *settled = true;
        self.token.is_cancelled()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Publishes the search-wide hit count as [`SearchEvent::Progress`].
///
/// Reports are serialized, so consecutive events never show a smaller count.
#[derive(Debug)]
pub struct ProgressPublisher {
    hits: Arc<AtomicU64>,
    last: Mutex<u64>,
    events: Sender<SearchEvent>,
}

impl ProgressPublisher {
    /// Create a publisher reading `hits`.
    pub fn new(hits: Arc<AtomicU64>, events: Sender<SearchEvent>) -> Self {
        Self {
            hits,
            last: Mutex::new(0),
            events,
        }
    }

    /// Send the current count if it moved since the last report, or always when `force` is set.
    pub fn publish(&self, shard_index: usize, shard_total: usize, force: bool) {
        let mut last = self.last.lock();
        let hits = self.hits.load(Ordering::Acquire).max(*last);
        if !force && hits == *last {
            return;
        }
        *last = hits;
        let _ = self.events.send(SearchEvent::Progress {
            shard_index,
            shard_total,
            hits,
        });
    }
}
