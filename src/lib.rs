//! # shardsearch
//!
//! A multi-shard search engine for append-mostly log and event data.
//!
//! ## Features
//!
//! - Translation of structured boolean expressions into native shard queries
//! - Concurrent per-shard execution under node-wide and per-search thread budgets
//! - Backpressured streaming of matches to value-extraction consumers
//! - Reference-counted caching of per-shard searchers with safe refresh
//! - Cooperative cancellation and search timeouts

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod expression;
pub mod query;
pub mod queue;
pub mod schema;
pub mod search;
pub mod shard;

pub mod prelude {
    pub use crate::analysis::AnalyzerType;
    pub use crate::config::{CacheConfig, SearchConfig};
    pub use crate::dictionary::{DictionaryRef, DictionaryStore, MemoryDictionaryStore};
    pub use crate::error::{Result, SearchError, TranslationError};
    pub use crate::expression::{Condition, Expression, Op, Operator, Term};
    pub use crate::query::{NativeQuery, QueryTranslator, TranslatedQuery};
    pub use crate::queue::{DocIdEntry, DocIdProducer, DocIdQueue};
    pub use crate::schema::{FieldMetadata, FieldType, IndexField, IndexFields};
    pub use crate::search::{
        CancellationToken, CollectingHitReceiver, HitBatch, HitReceiver, SearchEvent, SearchHandle,
        SearchOutcome, SearchScheduler, ShardError,
    };
    pub use crate::shard::{
        IndexMetadata, MemoryShardStore, ShardId, ShardOpener, ShardSearcher, ShardSearcherCache,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
