//! Bounded multi-producer/multi-consumer queue of matching document ids.
//!
//! Shard search threads (producers) push [`DocIdEntry`] values while value
//! extraction threads (consumers) drain them. The queue is created with the
//! number of producers that will feed it; it reports logical completion only
//! once every one of them has called [`DocIdQueue::complete`]. Producers block
//! while the queue is full so a fast shard scan cannot run ahead of a slow
//! extraction consumer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::error::{Result, SearchError};
use crate::shard::{DocOrdinal, ShardId};

/// A matching document: its shard and its ordinal within that shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocIdEntry {
    /// Shard the document was found in.
    pub shard_id: ShardId,

    /// Ordinal of the document within the shard.
    pub ordinal: DocOrdinal,
}

impl DocIdEntry {
    /// Create a new entry.
    pub fn new(shard_id: ShardId, ordinal: DocOrdinal) -> Self {
        Self { shard_id, ordinal }
    }
}

#[derive(Debug)]
struct QueueState {
    entries: VecDeque<DocIdEntry>,
    remaining_producers: usize,
    terminated: bool,
}

/// Capacity-bounded queue of [`DocIdEntry`] with per-producer completion.
#[derive(Debug)]
pub struct DocIdQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    producers: usize,
}

impl DocIdQueue {
    /// Create a queue holding at most `capacity` entries, fed by `producers` producers.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, producers: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                remaining_producers: producers,
                terminated: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            producers,
        }
    }

    /// Get a scoped producer handle that completes on drop.
    pub fn producer(self: &Arc<Self>) -> DocIdProducer {
        DocIdProducer {
            queue: Arc::clone(self),
            completed: false,
        }
    }

    /// Add an entry, blocking while the queue is full.
    ///
    /// Fails only when the queue has been terminated or when every registered
    /// producer has already completed.
    pub fn put(&self, entry: DocIdEntry) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return Err(SearchError::cancelled("document id queue terminated"));
            }
            if state.remaining_producers == 0 {
                drop(state);
                error!("put() called on a document id queue whose producers have all completed");
                return Err(SearchError::protocol_violation(
                    "put() after all producers completed",
                ));
            }
            if state.entries.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }

        state.entries.push_back(entry);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the next entry, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is empty and every producer completed, or
    /// as soon as the queue is terminated.
    pub fn take(&self) -> Option<DocIdEntry> {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return None;
            }
            if let Some(entry) = state.entries.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(entry);
            }
            if state.remaining_producers == 0 {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Take up to `max` entries at once, blocking only for the first.
    ///
    /// Returns `None` under the same conditions as [`DocIdQueue::take`].
    pub fn take_batch(&self, max: usize) -> Option<Vec<DocIdEntry>> {
        let max = max.max(1);
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return None;
            }
            if !state.entries.is_empty() {
                let n = max.min(state.entries.len());
                let batch: Vec<DocIdEntry> = state.entries.drain(..n).collect();
                drop(state);
                self.not_full.notify_all();
                return Some(batch);
            }
            if state.remaining_producers == 0 {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Signal that one producer has finished.
    ///
    /// Calling this more times than there are registered producers is a
    /// protocol violation; it is logged and reported, and never ignored.
    pub fn complete(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.remaining_producers == 0 {
            drop(state);
            error!(
                producers = self.producers,
                "complete() called more times than registered producers"
            );
            return Err(SearchError::protocol_violation(format!(
                "complete() called more than {} times",
                self.producers
            )));
        }

        state.remaining_producers -= 1;
        let finished = state.remaining_producers == 0;
        drop(state);

        if finished {
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
        Ok(())
    }

    /// Abandon the queue: wake every blocked producer and consumer.
    ///
    /// Pending and later `put` calls fail, `take` returns `None`. Producers
    /// may still call `complete`.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        state.entries.clear();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether the queue has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Whether every producer completed and every entry was consumed.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state.remaining_producers == 0 && state.entries.is_empty()
    }

    /// Number of producers that have not completed yet.
    pub fn remaining_producers(&self) -> usize {
        self.state.lock().remaining_producers
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no entries are currently queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A producer's handle on a [`DocIdQueue`].
///
/// Completes the queue exactly once: explicitly through
/// [`DocIdProducer::complete`] or implicitly when dropped, so a producer that
/// fails or panics can never leave consumers waiting forever.
#[derive(Debug)]
pub struct DocIdProducer {
    queue: Arc<DocIdQueue>,
    completed: bool,
}

impl DocIdProducer {
    /// Add an entry, blocking while the queue is full.
    pub fn put(&self, entry: DocIdEntry) -> Result<()> {
        self.queue.put(entry)
    }

    /// The queue this producer feeds.
    pub fn queue(&self) -> &Arc<DocIdQueue> {
        &self.queue
    }

    /// Complete this producer now.
    pub fn complete(mut self) -> Result<()> {
        self.completed = true;
        self.queue.complete()
    }
}

impl Drop for DocIdProducer {
    fn drop(&mut self) {
        if !self.completed {
            self.completed = true;
            // Violations are already logged by complete().
            let _ = self.queue.complete();
        }
    }
}
