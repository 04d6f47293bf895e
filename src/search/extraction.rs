//! Value extraction: the consumer side of a search's doc id queue.
//!
//! Consumers drain [`DocIdEntry`] batches, read the requested stored fields
//! from the same searcher generation that produced each hit, and hand the
//! materialized rows to a [`HitReceiver`].

use std::sync::Arc;

use ahash::AHashMap;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::queue::{DocIdEntry, DocIdQueue};
use crate::shard::{DocOrdinal, SearcherLease, ShardId};

/// One hit with its extracted values, in field-name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedHit {
    /// Document ordinal within the shard.
    pub ordinal: DocOrdinal,

    /// Stored values; `None` where the document has no value.
    pub values: Vec<Option<String>>,
}

/// A batch of hits from one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HitBatch {
    /// Shard the hits came from.
    pub shard_id: ShardId,

    /// Names of the extracted fields.
    pub field_names: Arc<[String]>,

    /// The hits.
    pub hits: Vec<ExtractedHit>,
}

/// Downstream consumer of extracted hits.
///
/// Called concurrently from a search's extraction threads, in no particular
/// shard order.
pub trait HitReceiver: Send + Sync {
    /// Accept one batch.
    fn receive(&self, batch: HitBatch);
}

impl HitReceiver for Sender<HitBatch> {
    fn receive(&self, batch: HitBatch) {
        // A dropped receiver means nobody wants the rows any more.
        let _ = self.send(batch);
    }
}

/// A receiver that keeps every batch in memory.
#[derive(Debug, Default)]
pub struct CollectingHitReceiver {
    batches: Mutex<Vec<HitBatch>>,
}

impl CollectingHitReceiver {
    /// Create an empty receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hits received.
    pub fn hit_count(&self) -> usize {
        self.batches.lock().iter().map(|b| b.hits.len()).sum()
    }

    /// All hits as `(shard, hit)` pairs, sorted by shard then ordinal.
    pub fn hits(&self) -> Vec<(ShardId, ExtractedHit)> {
        let mut hits: Vec<(ShardId, ExtractedHit)> = self
            .batches
            .lock()
            .iter()
            .flat_map(|batch| batch.hits.iter().map(move |hit| (batch.shard_id, hit.clone())))
            .collect();
        hits.sort_by_key(|(shard, hit)| (*shard, hit.ordinal));
        hits
    }

    /// Take the received batches.
    pub fn take(&self) -> Vec<HitBatch> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl HitReceiver for CollectingHitReceiver {
    fn receive(&self, batch: HitBatch) {
        self.batches.lock().push(batch);
    }
}

/// Leases pinned by the shard tasks of one search.
///
/// Extraction reads stored values through these pins, so a refresh that
/// supersedes a shard mid-search cannot change the documents behind an
/// ordinal. Dropping the registry releases every pin.
#[derive(Debug, Default)]
pub struct ShardRegistry {
    leases: Mutex<AHashMap<ShardId, SearcherLease>>,
}

impl ShardRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a lease for its shard. The first pin for a shard wins.
    pub fn pin(&self, lease: &SearcherLease) {
        self.leases
            .lock()
            .entry(lease.shard_id())
            .or_insert_with(|| lease.clone());
    }

    /// A lease on the pinned searcher of a shard.
    pub fn get(&self, shard: ShardId) -> Option<SearcherLease> {
        self.leases.lock().get(&shard).cloned()
    }

    /// Number of pinned shards.
    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    /// Whether nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.leases.lock().is_empty()
    }
}

/// Counters of one consumer thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Hits forwarded downstream.
    pub extracted: u64,

    /// Hits dropped because their values could not be read.
    pub failed: u64,
}

/// Drain the queue until it completes or is terminated.
pub fn run_consumer(
    queue: &DocIdQueue,
    registry: &ShardRegistry,
    field_names: &Arc<[String]>,
    receiver: &dyn HitReceiver,
    batch_size: usize,
) -> ExtractionStats {
    let mut stats = ExtractionStats::default();

    while let Some(entries) = queue.take_batch(batch_size.max(1)) {
        for (shard, ordinals) in group_by_shard(entries) {
            let Some(lease) = registry.get(shard) else {
                warn!(shard = %shard, dropped = ordinals.len(), "no pinned searcher for hits");
                stats.failed += ordinals.len() as u64;
                continue;
            };

            let mut hits = Vec::with_capacity(ordinals.len());
            for ordinal in ordinals {
                let values = if field_names.is_empty() {
                    Ok(Vec::new())
                } else {
                    lease.stored_values(ordinal, field_names)
                };
                match values {
                    Ok(values) => hits.push(ExtractedHit { ordinal, values }),
                    Err(e) => {
                        warn!(shard = %shard, ordinal, error = %e, "failed to extract stored values");
                        stats.failed += 1;
                    }
                }
            }

            if hits.is_empty() {
                continue;
            }
            stats.extracted += hits.len() as u64;
            receiver.receive(HitBatch {
                shard_id: shard,
                field_names: Arc::clone(field_names),
                hits,
            });
        }
    }
    stats
}

/// Split a batch into runs of the same shard, keeping queue order.
fn group_by_shard(entries: Vec<DocIdEntry>) -> Vec<(ShardId, Vec<DocOrdinal>)> {
    let mut groups: Vec<(ShardId, Vec<DocOrdinal>)> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some((shard, ordinals)) if *shard == entry.shard_id => ordinals.push(entry.ordinal),
            _ => groups.push((entry.shard_id, vec![entry.ordinal])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::schema::{IndexField, IndexFields};
    use crate::shard::ShardSearcherCache;
    use crate::shard::memory::{MemoryShardStore, document};

    #[test]
    fn test_group_by_shard() {
        let entries = vec![
            DocIdEntry::new(ShardId(1), 0),
            DocIdEntry::new(ShardId(1), 2),
            DocIdEntry::new(ShardId(2), 1),
            DocIdEntry::new(ShardId(1), 3),
        ];
        let groups = group_by_shard(entries);
        assert_eq!(
            groups,
            vec![
                (ShardId(1), vec![0, 2]),
                (ShardId(2), vec![1]),
                (ShardId(1), vec![3]),
            ]
        );
    }

    #[test]
    fn test_consumer_extracts_pinned_values() {
        let store = Arc::new(MemoryShardStore::new(
            IndexFields::new().with(IndexField::keyword("host")),
        ));
        store.add_shard(ShardId(1), vec![document([("host", "a")]), document([("host", "b")])]);
        let cache = ShardSearcherCache::new(CacheConfig::default(), store.clone(), store.clone());

        let registry = ShardRegistry::new();
        let lease = cache.acquire(ShardId(1)).unwrap();
        registry.pin(&lease);
        drop(lease);

        // A new version after pinning does not change what extraction reads.
        store.add_shard(ShardId(1), vec![document([("host", "z")])]);
        cache.refresh().unwrap();

        let queue = Arc::new(DocIdQueue::new(10, 1));
        let producer = queue.producer();
        producer.put(DocIdEntry::new(ShardId(1), 1)).unwrap();
        producer.put(DocIdEntry::new(ShardId(7), 0)).unwrap();
        producer.complete().unwrap();

        let receiver = CollectingHitReceiver::new();
        let fields: Arc<[String]> = Arc::from(vec!["host".to_string()]);
        let stats = run_consumer(&queue, &registry, &fields, &receiver, 10);

        assert_eq!(stats, ExtractionStats { extracted: 1, failed: 1 });
        assert_eq!(
            receiver.hits(),
            vec![(
                ShardId(1),
                ExtractedHit {
                    ordinal: 1,
                    values: vec![Some("b".to_string())],
                }
            )]
        );

        drop(registry);
        assert_eq!(store.close_count(), 1);
    }

    #[test]
    fn test_hit_batch_serializes_shared_field_names() {
        let fields: Arc<[String]> = Arc::from(vec!["host".to_string(), "status".to_string()]);
        let batch = HitBatch {
            shard_id: ShardId(4),
            field_names: Arc::clone(&fields),
            hits: vec![ExtractedHit {
                ordinal: 2,
                values: vec![Some("web-1".to_string()), None],
            }],
        };

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["field_names"], serde_json::json!(["host", "status"]));
        assert_eq!(json["hits"][0]["values"], serde_json::json!(["web-1", null]));
    }
}
