//! Reference-counted cache of opened shard searchers.
//!
//! The cache keeps one [`SearcherHandle`] per shard in a directory guarded by
//! a single short-held lock. Opening and closing searchers always happens
//! outside that lock.
//!
//! Handles are never mutated into a new shard version. A refresh that finds a
//! changed shard opens a fresh handle, swaps it into the directory and
//! retires the old one. Retired handles keep serving the searches that hold
//! them and are closed when their last [`SearcherLease`] is dropped.

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{Result, SearchError};
use crate::shard::{IndexMetadata, ShardId, ShardLocation, ShardOpener, ShardSearcher};

#[derive(Debug, Default)]
struct HandleState {
    refs: usize,
    retired: bool,
    closed: bool,
}

/// An opened searcher plus its reference count.
pub struct SearcherHandle {
    shard_id: ShardId,
    generation: u64,
    location: ShardLocation,
    searcher: Arc<dyn ShardSearcher>,
    opened_at: Instant,
    last_used: AtomicU64,
    state: Mutex<HandleState>,
    pending_close: Arc<AtomicUsize>,
}

impl SearcherHandle {
    fn new(
        shard_id: ShardId,
        generation: u64,
        location: ShardLocation,
        searcher: Arc<dyn ShardSearcher>,
        tick: u64,
        pending_close: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            shard_id,
            generation,
            location,
            searcher,
            opened_at: Instant::now(),
            last_used: AtomicU64::new(tick),
            state: Mutex::new(HandleState::default()),
            pending_close,
        }
    }

    /// The shard this handle reads.
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Cache-wide generation number of this handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The location the searcher was opened from.
    pub fn location(&self) -> &ShardLocation {
        &self.location
    }

    /// The searcher.
    pub fn searcher(&self) -> &Arc<dyn ShardSearcher> {
        &self.searcher
    }

    /// When the searcher was opened.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.state.lock().refs
    }

    /// Whether the handle has been superseded or evicted.
    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Whether the searcher has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn retain(&self, tick: u64) {
        self.state.lock().refs += 1;
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    /// Drop one reference. Returns true when the caller must close the searcher.
    fn release(&self) -> bool {
        let mut state = self.state.lock();
        state.refs = state.refs.saturating_sub(1);
        if state.refs == 0 && state.retired && !state.closed {
            state.closed = true;
            return true;
        }
        false
    }

    /// Mark the handle retired. Returns true when the caller must close the searcher now.
    fn retire(&self) -> bool {
        let mut state = self.state.lock();
        if state.retired {
            return false;
        }
        state.retired = true;
        if state.refs == 0 {
            state.closed = true;
            true
        } else {
            self.pending_close.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn close_searcher(&self, lazily: bool) {
        if lazily {
            self.pending_close.fetch_sub(1, Ordering::Relaxed);
        }
        match self.searcher.close() {
            Ok(()) => debug!(
                shard = %self.shard_id,
                generation = self.generation,
                "closed shard searcher"
            ),
            Err(e) => warn!(
                shard = %self.shard_id,
                generation = self.generation,
                error = %e,
                "failed to close shard searcher"
            ),
        }
    }
}

impl fmt::Debug for SearcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SearcherHandle")
            .field("shard_id", &self.shard_id)
            .field("generation", &self.generation)
            .field("version", &self.location.version)
            .field("refs", &state.refs)
            .field("retired", &state.retired)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A counted reference to a [`SearcherHandle`].
///
/// Dropping the lease releases the reference. Cloning takes another one.
#[derive(Debug)]
pub struct SearcherLease {
    handle: Arc<SearcherHandle>,
}

impl SearcherLease {
    /// The shard this lease reads.
    pub fn shard_id(&self) -> ShardId {
        self.handle.shard_id
    }

    /// Generation of the leased handle.
    pub fn generation(&self) -> u64 {
        self.handle.generation
    }

    /// The leased handle.
    pub fn handle(&self) -> &Arc<SearcherHandle> {
        &self.handle
    }
}

impl Deref for SearcherLease {
    type Target = dyn ShardSearcher;

    fn deref(&self) -> &Self::Target {
        self.handle.searcher.as_ref()
    }
}

impl Clone for SearcherLease {
    fn clone(&self) -> Self {
        let tick = self.handle.last_used.load(Ordering::Relaxed);
        self.handle.retain(tick);
        Self {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl Drop for SearcherLease {
    fn drop(&mut self) {
        if self.handle.release() {
            self.handle.close_searcher(true);
        }
    }
}

/// A snapshot of one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The shard.
    pub shard_id: ShardId,

    /// Generation of the current handle.
    pub generation: u64,

    /// Shard version the handle was opened at.
    pub version: u64,

    /// Outstanding leases.
    pub refs: usize,
}

/// Counters describing the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Handles in the directory.
    pub open: usize,

    /// Leases outstanding on directory handles.
    pub active_leases: usize,

    /// Retired handles still waiting for their last lease.
    pub retired_pending: usize,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Shards opened for the first time.
    pub opened: Vec<ShardId>,

    /// Shards whose entry was replaced by a newer version.
    pub superseded: Vec<ShardId>,

    /// Shards no longer listed by the index metadata.
    pub removed: Vec<ShardId>,

    /// Shards that could not be opened, with the reason.
    pub failed: Vec<(ShardId, String)>,
}

impl RefreshReport {
    /// Whether the refresh changed nothing.
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.superseded.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Node-wide cache of shard searchers.
pub struct ShardSearcherCache {
    config: CacheConfig,
    metadata: Arc<dyn IndexMetadata>,
    opener: Arc<dyn ShardOpener>,
    directory: RwLock<AHashMap<ShardId, Arc<SearcherHandle>>>,
    next_generation: AtomicU64,
    clock: AtomicU64,
    pending_close: Arc<AtomicUsize>,
}

impl ShardSearcherCache {
    /// Create a cache over the given collaborators.
    pub fn new(config: CacheConfig, metadata: Arc<dyn IndexMetadata>, opener: Arc<dyn ShardOpener>) -> Self {
        Self {
            config,
            metadata,
            opener,
            directory: RwLock::new(AHashMap::new()),
            next_generation: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            pending_close: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Shards the index metadata currently lists.
    pub fn list_shards(&self) -> Result<Vec<ShardId>> {
        self.metadata.list_shards()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn new_handle(&self, shard: ShardId, location: ShardLocation, searcher: Arc<dyn ShardSearcher>) -> Arc<SearcherHandle> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Arc::new(SearcherHandle::new(
            shard,
            generation,
            location,
            searcher,
            self.tick(),
            Arc::clone(&self.pending_close),
        ))
    }

    fn open(&self, shard: ShardId) -> Result<(ShardLocation, Arc<dyn ShardSearcher>)> {
        let location = self.metadata.shard_location(shard).map_err(|e| unavailable(shard, e))?;
        let searcher = self.opener.open(shard, &location).map_err(|e| unavailable(shard, e))?;
        debug!(shard = %shard, version = location.version, path = %location.path.display(), "opened shard searcher");
        Ok((location, searcher))
    }

    /// Lease the current searcher of a shard, opening it if needed.
    pub fn acquire(&self, shard: ShardId) -> Result<SearcherLease> {
        if let Some(lease) = self.lookup(shard) {
            return Ok(lease);
        }

        let (location, searcher) = self.open(shard)?;
        let candidate = self.new_handle(shard, location, searcher);

        let (lease, loser, evicted) = {
            let mut directory = self.directory.write();
            match directory.get(&shard).cloned() {
                Some(existing) => {
                    existing.retain(self.tick());
                    (SearcherLease { handle: existing }, Some(candidate), Vec::new())
                }
                None => {
                    candidate.retain(self.tick());
                    directory.insert(shard, Arc::clone(&candidate));
                    let evicted = self.evict_idle(&mut directory);
                    (SearcherLease { handle: candidate }, None, evicted)
                }
            }
        };

        if let Some(loser) = loser {
            debug!(shard = %shard, "discarding searcher opened concurrently");
            loser.close_searcher(false);
        }
        close_all(evicted);
        Ok(lease)
    }

    fn lookup(&self, shard: ShardId) -> Option<SearcherLease> {
        let directory = self.directory.read();
        let handle = directory.get(&shard)?;
        // Retirement needs the write lock, so the handle is live here.
        handle.retain(self.tick());
        Some(SearcherLease {
            handle: Arc::clone(handle),
        })
    }

    /// Release a lease. Equivalent to dropping it.
    pub fn release(&self, lease: SearcherLease) {
        drop(lease);
    }

    /// Reconcile the directory with the shards the index metadata lists.
    pub fn refresh(&self) -> Result<RefreshReport> {
        let listed = self.metadata.list_shards()?;
        let mut report = RefreshReport::default();

        let known: AHashMap<ShardId, u64> = self
            .directory
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.location.version))
            .collect();

        let mut opened = Vec::new();
        let mut stale = Vec::new();
        for &shard in &listed {
            let location = match self.metadata.shard_location(shard) {
                Ok(location) => location,
                Err(e) => {
                    warn!(shard = %shard, error = %e, "failed to locate shard during refresh");
                    report.failed.push((shard, e.to_string()));
                    continue;
                }
            };

            match known.get(&shard) {
                Some(version) if *version == location.version => continue,
                Some(_) => {}
                None if !self.config.warm_new_shards => continue,
                None => {}
            }

            match self.opener.open(shard, &location) {
                Ok(searcher) => opened.push(self.new_handle(shard, location, searcher)),
                Err(e) => {
                    warn!(shard = %shard, error = %e, "failed to open shard during refresh");
                    report.failed.push((shard, e.to_string()));
                    if known.contains_key(&shard) {
                        stale.push(shard);
                    }
                }
            }
        }

        let mut to_close = Vec::new();
        let mut discarded = Vec::new();
        {
            let mut directory = self.directory.write();

            for handle in opened {
                let shard = handle.shard_id;
                let existing_version = directory.get(&shard).map(|h| h.location.version);
                match existing_version {
                    Some(version) if version >= handle.location.version => {
                        // An acquire opened this version or a newer one in the meantime.
                        discarded.push(handle);
                    }
                    Some(_) => {
                        if let Some(old) = directory.insert(shard, handle) {
                            if old.retire() {
                                to_close.push(old);
                            }
                        }
                        report.superseded.push(shard);
                    }
                    None => {
                        directory.insert(shard, handle);
                        report.opened.push(shard);
                    }
                }
            }

            for shard in stale {
                if let Some(old) = directory.remove(&shard) {
                    if old.retire() {
                        to_close.push(old);
                    }
                    report.superseded.push(shard);
                }
            }

            let live: HashSet<ShardId> = listed.iter().copied().collect();
            let removed: Vec<ShardId> = directory.keys().filter(|id| !live.contains(id)).copied().collect();
            for shard in removed {
                if let Some(old) = directory.remove(&shard) {
                    if old.retire() {
                        to_close.push(old);
                    }
                    report.removed.push(shard);
                }
            }

            to_close.extend(self.evict_idle(&mut directory));
        }

        for handle in discarded {
            handle.close_searcher(false);
        }
        close_all(to_close);

        report.opened.sort();
        report.superseded.sort();
        report.removed.sort();
        info!(
            opened = report.opened.len(),
            superseded = report.superseded.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "refreshed shard searcher cache"
        );
        Ok(report)
    }

    /// Supersede one shard's entry. The next acquire reopens it.
    pub fn invalidate(&self, shard: ShardId) -> bool {
        let old = self.directory.write().remove(&shard);
        match old {
            Some(old) => {
                if old.retire() {
                    old.close_searcher(false);
                }
                true
            }
            None => false,
        }
    }

    /// Supersede every entry.
    pub fn clear(&self) {
        let drained: Vec<Arc<SearcherHandle>> = self.directory.write().drain().map(|(_, h)| h).collect();
        let to_close: Vec<Arc<SearcherHandle>> = drained.into_iter().filter(|h| h.retire()).collect();
        close_all(to_close);
    }

    /// Snapshot of the directory, ordered by shard.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .directory
            .read()
            .values()
            .map(|handle| CacheEntry {
                shard_id: handle.shard_id,
                generation: handle.generation,
                version: handle.location.version,
                refs: handle.ref_count(),
            })
            .collect();
        entries.sort_by_key(|e| e.shard_id);
        entries
    }

    /// Cache counters.
    pub fn stats(&self) -> CacheStats {
        let directory = self.directory.read();
        CacheStats {
            open: directory.len(),
            active_leases: directory.values().map(|h| h.ref_count()).sum(),
            retired_pending: self.pending_close.load(Ordering::Relaxed),
        }
    }

    /// Evict least recently used idle handles beyond `max_open_shards`.
    ///
    /// Must be called with the directory write lock held, so no lease can be
    /// taken on a handle while its count is inspected.
    fn evict_idle(&self, directory: &mut AHashMap<ShardId, Arc<SearcherHandle>>) -> Vec<Arc<SearcherHandle>> {
        let Some(max_open) = self.config.max_open_shards else {
            return Vec::new();
        };
        if directory.len() <= max_open {
            return Vec::new();
        }

        let mut idle: Vec<(u64, ShardId)> = directory
            .values()
            .filter(|h| h.ref_count() == 0)
            .map(|h| (h.last_used.load(Ordering::Relaxed), h.shard_id))
            .collect();
        idle.sort_unstable();

        let excess = directory.len() - max_open;
        let mut evicted = Vec::with_capacity(excess);
        for (_, shard) in idle.into_iter().take(excess) {
            if let Some(handle) = directory.remove(&shard) {
                debug!(shard = %shard, "evicting idle shard searcher");
                if handle.retire() {
                    evicted.push(handle);
                }
            }
        }
        evicted
    }
}

impl fmt::Debug for ShardSearcherCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSearcherCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn close_all(handles: Vec<Arc<SearcherHandle>>) {
    for handle in handles {
        handle.close_searcher(false);
    }
}

fn unavailable(shard: ShardId, error: SearchError) -> SearchError {
    match error {
        SearchError::ShardUnavailable { .. } => error,
        other => SearchError::shard_unavailable(shard, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexField, IndexFields};
    use crate::shard::memory::{MemoryShardStore, document};

    fn store(shards: u64) -> Arc<MemoryShardStore> {
        let store = MemoryShardStore::new(IndexFields::new().with(IndexField::keyword("host")));
        for id in 1..=shards {
            store.add_shard(ShardId(id), vec![document([("host", format!("h{id}"))])]);
        }
        Arc::new(store)
    }

    fn cache(store: &Arc<MemoryShardStore>, config: CacheConfig) -> ShardSearcherCache {
        ShardSearcherCache::new(config, store.clone(), store.clone())
    }

    #[test]
    fn test_acquire_reuses_handle() {
        let store = store(1);
        let cache = cache(&store, CacheConfig::default());

        let a = cache.acquire(ShardId(1)).unwrap();
        let b = cache.acquire(ShardId(1)).unwrap();
        assert_eq!(a.generation(), b.generation());
        assert_eq!(a.handle().ref_count(), 2);
        assert_eq!(store.open_count(), 1);

        cache.release(a);
        drop(b);
        assert_eq!(cache.stats().active_leases, 0);
        assert_eq!(store.close_count(), 0);
    }

    #[test]
    fn test_acquire_unavailable() {
        let store = store(1);
        let cache = cache(&store, CacheConfig::default());

        let err = cache.acquire(ShardId(9)).unwrap_err();
        assert_eq!(err.shard(), Some(ShardId(9)));

        store.fail_open(ShardId(1), "corrupt segment");
        assert!(matches!(
            cache.acquire(ShardId(1)),
            Err(SearchError::ShardUnavailable { .. })
        ));
    }

    #[test]
    fn test_superseded_handle_closes_on_release() {
        let store = store(1);
        let cache = cache(&store, CacheConfig::default());

        let lease = cache.acquire(ShardId(1)).unwrap();
        store.add_shard(ShardId(1), vec![document([("host", "new")])]);

        let report = cache.refresh().unwrap();
        assert_eq!(report.superseded, vec![ShardId(1)]);
        assert!(lease.handle().is_retired());
        assert!(!lease.handle().is_closed());
        assert_eq!(cache.stats().retired_pending, 1);

        let fresh = cache.acquire(ShardId(1)).unwrap();
        assert!(fresh.generation() > lease.generation());

        let old = Arc::clone(lease.handle());
        drop(lease);
        assert!(old.is_closed());
        assert_eq!(cache.stats().retired_pending, 0);
        assert_eq!(store.close_count(), 1);
    }

    #[test]
    fn test_refresh_opens_and_removes() {
        let store = store(3);
        let cache = cache(&store, CacheConfig::default());

        let report = cache.refresh().unwrap();
        assert_eq!(report.opened, vec![ShardId(1), ShardId(2), ShardId(3)]);

        store.remove_shard(ShardId(2));
        store.fail_open(ShardId(3), "gone bad");
        store.add_shard(ShardId(4), vec![]);
        let report = cache.refresh().unwrap();
        assert_eq!(report.opened, vec![ShardId(4)]);
        assert_eq!(report.removed, vec![ShardId(2)]);
        assert!(report.failed.is_empty());

        let second = cache.refresh().unwrap();
        assert!(second.is_empty());
        assert_eq!(cache.entries().len(), 3);
    }

    #[test]
    fn test_lazy_open_without_warming() {
        let store = store(2);
        let cache = cache(&store, CacheConfig::new().with_warm_new_shards(false));

        let report = cache.refresh().unwrap();
        assert!(report.opened.is_empty());
        assert_eq!(store.open_count(), 0);

        let _lease = cache.acquire(ShardId(2)).unwrap();
        assert_eq!(store.open_count(), 1);
    }

    #[test]
    fn test_idle_eviction() {
        let store = store(3);
        let cache = cache(&store, CacheConfig::new().with_max_open_shards(2));

        drop(cache.acquire(ShardId(1)).unwrap());
        let held = cache.acquire(ShardId(2)).unwrap();
        drop(cache.acquire(ShardId(3)).unwrap());

        let shards: Vec<ShardId> = cache.entries().iter().map(|e| e.shard_id).collect();
        assert_eq!(shards, vec![ShardId(2), ShardId(3)]);
        assert_eq!(store.close_count(), 1);
        drop(held);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let store = store(2);
        let cache = cache(&store, CacheConfig::default());
        cache.refresh().unwrap();

        let lease = cache.acquire(ShardId(1)).unwrap();
        assert!(cache.invalidate(ShardId(1)));
        assert!(!cache.invalidate(ShardId(1)));
        assert_eq!(store.close_count(), 0);

        cache.clear();
        assert_eq!(cache.stats().open, 0);
        assert_eq!(store.close_count(), 1);

        drop(lease);
        assert_eq!(store.close_count(), 2);
    }

    /// Publishes a new shard version and acquires it while a refresh is
    /// still opening the version it listed.
    struct RacingOpener {
        store: Arc<MemoryShardStore>,
        cache: std::sync::OnceLock<std::sync::Weak<ShardSearcherCache>>,
        raced: std::sync::atomic::AtomicBool,
    }

    impl ShardOpener for RacingOpener {
        fn open(&self, shard: ShardId, location: &ShardLocation) -> Result<Arc<dyn ShardSearcher>> {
            let searcher = self.store.open(shard, location)?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.store
                    .add_shard(shard, vec![document([("host", "a")]), document([("host", "b")])]);
                if let Some(cache) = self.cache.get().and_then(|weak| weak.upgrade()) {
                    drop(cache.acquire(shard)?);
                }
            }
            Ok(searcher)
        }
    }

    #[test]
    fn test_refresh_keeps_newer_concurrent_open() {
        let store = store(1);
        let opener = Arc::new(RacingOpener {
            store: Arc::clone(&store),
            cache: std::sync::OnceLock::new(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let cache = Arc::new(ShardSearcherCache::new(
            CacheConfig::default(),
            store.clone(),
            opener.clone(),
        ));
        opener.cache.set(Arc::downgrade(&cache)).unwrap();

        let report = cache.refresh().unwrap();
        assert!(report.opened.is_empty());
        assert!(report.superseded.is_empty());

        // The stale version opened by the refresh was discarded.
        assert_eq!(store.close_count(), 1);
        let lease = cache.acquire(ShardId(1)).unwrap();
        assert_eq!(lease.handle().location().version, 2);
        assert_eq!(lease.doc_count(), 2);
        assert_eq!(store.open_count(), 2);
    }
}
