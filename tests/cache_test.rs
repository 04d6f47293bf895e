//! Integration tests for searcher reference safety across cache refreshes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use shardsearch::prelude::*;
use shardsearch::shard::memory::{Document, collect_all, document};

fn docs(n: usize, tag: &str) -> Vec<Document> {
    (0..n).map(|i| document([("host", format!("{tag}-{i}"))])).collect()
}

fn setup(shards: u64) -> (Arc<MemoryShardStore>, ShardSearcherCache) {
    let store = Arc::new(MemoryShardStore::new(
        IndexFields::new().with(IndexField::keyword("host")),
    ));
    for shard in 1..=shards {
        store.add_shard(ShardId(shard), docs(5, "v1"));
    }
    let cache = ShardSearcherCache::new(CacheConfig::default(), store.clone(), store.clone());
    (store, cache)
}

#[test]
fn test_held_handle_survives_refresh() -> Result<()> {
    let (store, cache) = setup(1);
    let old = cache.acquire(ShardId(1))?;
    let old_generation = old.generation();

    store.add_shard(ShardId(1), docs(2, "v2"));
    let report = cache.refresh()?;
    assert_eq!(report.superseded, vec![ShardId(1)]);

    // The holder keeps searching its generation.
    assert_eq!(collect_all(&*old, &NativeQuery::MatchAll)?.len(), 5);
    assert_eq!(store.close_count(), 0);
    assert_eq!(cache.stats().retired_pending, 1);

    // New acquires see the new generation.
    let new = cache.acquire(ShardId(1))?;
    assert!(new.generation() > old_generation);
    assert_eq!(new.doc_count(), 2);

    drop(old);
    assert_eq!(store.close_count(), 1);
    assert_eq!(cache.stats().retired_pending, 0);

    drop(new);
    assert_eq!(store.close_count(), 1);
    Ok(())
}

#[test]
fn test_removed_shard_closes_after_last_release() -> Result<()> {
    let (store, cache) = setup(2);
    cache.refresh()?;
    let lease = cache.acquire(ShardId(2))?;
    let clone = lease.clone();

    assert!(store.remove_shard(ShardId(2)));
    let report = cache.refresh()?;
    assert_eq!(report.removed, vec![ShardId(2)]);
    assert!(matches!(
        cache.acquire(ShardId(2)),
        Err(SearchError::ShardUnavailable { .. })
    ));

    drop(lease);
    assert_eq!(store.close_count(), 0);
    drop(clone);
    assert_eq!(store.close_count(), 1);
    Ok(())
}

#[test]
fn test_concurrent_searches_during_refresh() -> Result<()> {
    let (store, cache) = setup(4);
    let cache = Arc::new(cache);
    cache.refresh()?;
    let stop = Arc::new(AtomicBool::new(false));

    let searchers: Vec<_> = (0..6)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            thread::spawn(move || -> Result<usize> {
                let mut searches = 0;
                while !stop.load(Ordering::Relaxed) {
                    let shard = ShardId(1 + (searches + i) as u64 % 4);
                    let lease = cache.acquire(shard)?;
                    // Fails if the searcher was closed under the lease.
                    let hits = collect_all(&*lease, &NativeQuery::MatchAll)?;
                    assert!(!hits.is_empty());
                    searches += 1;
                }
                Ok(searches)
            })
        })
        .collect();

    for round in 0..50 {
        let shard = ShardId(1 + round % 4);
        store.add_shard(shard, docs(3 + (round as usize % 3), "next"));
        cache.refresh()?;
        thread::sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::Relaxed);

    for searcher in searchers {
        assert!(searcher.join().unwrap()? > 0);
    }

    let stats = cache.stats();
    assert_eq!(stats.active_leases, 0);
    assert_eq!(stats.retired_pending, 0);
    assert_eq!(stats.open, 4);
    assert_eq!(store.close_count(), store.open_count() - 4);
    Ok(())
}

#[test]
fn test_idle_handles_evicted_beyond_limit() -> Result<()> {
    let store = Arc::new(MemoryShardStore::new(
        IndexFields::new().with(IndexField::keyword("host")),
    ));
    for shard in 1..=4 {
        store.add_shard(ShardId(shard), docs(1, "v1"));
    }
    let cache = ShardSearcherCache::new(
        CacheConfig::default().with_max_open_shards(2).with_warm_new_shards(false),
        store.clone(),
        store.clone(),
    );

    let pinned = cache.acquire(ShardId(1))?;
    drop(cache.acquire(ShardId(2))?);
    drop(cache.acquire(ShardId(3))?);
    drop(cache.acquire(ShardId(4))?);

    let open: Vec<ShardId> = cache.entries().iter().map(|e| e.shard_id).collect();
    assert!(open.len() <= 2);
    assert!(open.contains(&ShardId(1)), "a leased handle is never evicted");
    assert!(!pinned.handle().is_closed());
    Ok(())
}
