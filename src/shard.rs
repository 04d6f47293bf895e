//! Shards and the interfaces of the embedded per-shard index engine.
//!
//! A shard is an independent partition of the overall index. This crate does
//! not own the on-disk format: shards are discovered through
//! [`IndexMetadata`], opened through [`ShardOpener`] and queried through the
//! [`ShardSearcher`] trait. [`memory`] provides an in-memory implementation of
//! all three.

pub mod cache;
pub mod memory;

use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::NativeQuery;

pub use cache::{CacheEntry, CacheStats, RefreshReport, SearcherHandle, SearcherLease, ShardSearcherCache};
pub use memory::{MemoryShard, MemoryShardStore};

/// Identifier of an index shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ShardId {
    fn from(id: u64) -> Self {
        ShardId(id)
    }
}

/// Ordinal of a document within one shard. Only meaningful with its shard id.
pub type DocOrdinal = u32;

/// Where a shard lives and which version of it is current.
///
/// A change of `version` between two refreshes marks the shard as changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardLocation {
    /// Path (or other source descriptor) of the shard's files.
    pub path: PathBuf,

    /// Commit version of the shard.
    pub version: u64,
}

impl ShardLocation {
    /// Create a new shard location.
    pub fn new<P: Into<PathBuf>>(path: P, version: u64) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }
}

/// Receives matching document ordinals from a shard scan.
pub trait HitCollector {
    /// Collect one hit. Returning `Break` stops the scan early.
    fn collect(&mut self, ordinal: DocOrdinal) -> ControlFlow<()>;
}

impl<F> HitCollector for F
where
    F: FnMut(DocOrdinal) -> ControlFlow<()>,
{
    fn collect(&mut self, ordinal: DocOrdinal) -> ControlFlow<()> {
        self(ordinal)
    }
}

/// An opened, queryable view of one shard.
///
/// Implementations must be safe for concurrent read-only use: several
/// searches may scan the same searcher at once.
pub trait ShardSearcher: Send + Sync + fmt::Debug {
    /// Number of documents in the shard.
    fn doc_count(&self) -> u32;

    /// Run the query, passing every match to the collector in scan order.
    fn search(&self, query: &NativeQuery, collector: &mut dyn HitCollector) -> Result<()>;

    /// Read the stored values of the named fields for one document.
    fn stored_values(&self, ordinal: DocOrdinal, field_names: &[String]) -> Result<Vec<Option<String>>>;

    /// Release the searcher's resources. Called once, after the last user.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The index-metadata collaborator.
pub trait IndexMetadata: Send + Sync {
    /// Enumerate the shards currently known on this node.
    fn list_shards(&self) -> Result<Vec<ShardId>>;

    /// Location and version of a shard.
    fn shard_location(&self, shard: ShardId) -> Result<ShardLocation>;
}

/// Opens searchers for shard locations.
pub trait ShardOpener: Send + Sync {
    /// Open a searcher. Fails when the shard is missing or corrupt.
    fn open(&self, shard: ShardId, location: &ShardLocation) -> Result<Arc<dyn ShardSearcher>>;
}
