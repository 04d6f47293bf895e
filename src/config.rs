//! Configuration for multi-shard search operations.
//!
//! The defaults mirror the node-level search properties of a small log
//! search cluster: a 1000 entry document id queue, four shard search threads
//! per node and two threads per search.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Configuration for the search scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Capacity of each search's document id queue.
    pub max_doc_id_queue_size: usize,

    /// Absolute maximum number of shard search threads on the node, across all searches.
    pub max_threads: usize,

    /// Maximum number of shard search threads a single search may use at once.
    pub max_threads_per_task: usize,

    /// Number of value extraction consumers started per search.
    pub extraction_threads_per_search: usize,

    /// Maximum number of hits forwarded downstream in one batch.
    pub extraction_batch_size: usize,

    /// Number of hits a shard worker collects between cancellation checks.
    pub cancel_check_interval: usize,

    /// Number of hits a shard worker collects between two progress reports.
    pub progress_interval: usize,

    /// Maximum number of clauses a single boolean query node may contain.
    pub max_boolean_clause_count: usize,

    /// Cancel searches that run longer than this.
    pub search_timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_doc_id_queue_size: 1000,
            max_threads: 4,
            max_threads_per_task: 2,
            extraction_threads_per_search: default_extraction_threads(),
            extraction_batch_size: 100,
            cancel_check_interval: 1000,
            progress_interval: 100,
            max_boolean_clause_count: 1024,
            search_timeout: None,
        }
    }
}

impl SearchConfig {
    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the document id queue capacity.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.max_doc_id_queue_size = size;
        self
    }

    /// Set the node-wide thread ceiling.
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set the per-search thread ceiling.
    pub fn with_max_threads_per_task(mut self, threads: usize) -> Self {
        self.max_threads_per_task = threads;
        self
    }

    /// Set the number of extraction consumers per search.
    pub fn with_extraction_threads(mut self, threads: usize) -> Self {
        self.extraction_threads_per_search = threads;
        self
    }


    /// Set the search timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = Some(timeout);
        self
    }

    /// Set the cancellation check interval.
    pub fn with_cancel_check_interval(mut self, interval: usize) -> Self {
        self.cancel_check_interval = interval;
        self
    }

    /// Set how many hits a shard worker collects between progress reports.
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Check that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_doc_id_queue_size", self.max_doc_id_queue_size),
            ("max_threads", self.max_threads),
            ("max_threads_per_task", self.max_threads_per_task),
            (
                "extraction_threads_per_search",
                self.extraction_threads_per_search,
            ),
            ("extraction_batch_size", self.extraction_batch_size),
            ("cancel_check_interval", self.cancel_check_interval),
            ("progress_interval", self.progress_interval),
            ("max_boolean_clause_count", self.max_boolean_clause_count),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SearchError::invalid_config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// The per-search ceiling, never larger than the node-wide one.
    pub fn effective_threads_per_task(&self) -> usize {
        self.max_threads_per_task.min(self.max_threads)
    }
}

/// Extraction consumers per search: half the cores, between one and four.
fn default_extraction_threads() -> usize {
    (num_cpus::get() / 2).clamp(1, 4)
}

/// Configuration for the shard searcher cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of open searchers kept while idle. `None` keeps all.
    pub max_open_shards: Option<usize>,

    /// Open searchers for newly listed shards during refresh.
    pub warm_new_shards: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheConfig {
    /// Create a cache configuration that warms new shards on refresh.
    pub fn new() -> Self {
        Self {
            max_open_shards: None,
            warm_new_shards: true,
        }
    }

    /// Bound the number of idle open searchers.
    pub fn with_max_open_shards(mut self, max_open: usize) -> Self {
        self.max_open_shards = Some(max_open);
        self
    }

    /// Set whether refresh opens newly listed shards.
    pub fn with_warm_new_shards(mut self, warm: bool) -> Self {
        self.warm_new_shards = warm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.max_doc_id_queue_size, 1000);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.max_threads_per_task, 2);
        assert_eq!(config.max_boolean_clause_count, 1024);
        assert_eq!(config.progress_interval, 100);
        assert!(config.search_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extraction_threads_follow_cores() {
        let config = SearchConfig::default();
        assert_eq!(
            config.extraction_threads_per_search,
            (num_cpus::get() / 2).clamp(1, 4)
        );
        assert!((1..=4).contains(&config.extraction_threads_per_search));

        let config: SearchConfig = serde_json::from_str(r#"{"max_threads": 2}"#).unwrap();
        assert_eq!(
            config.extraction_threads_per_search,
            default_extraction_threads()
        );
    }

    #[test]
    fn test_config_builder() {
        let config = SearchConfig::default()
            .with_queue_size(10)
            .with_max_threads(8)
            .with_max_threads_per_task(16)
            .with_extraction_threads(3)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.max_doc_id_queue_size, 10);
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.effective_threads_per_task(), 8);
        assert_eq!(config.extraction_threads_per_search, 3);
        assert_eq!(config.search_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = SearchConfig::default().with_max_threads(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_threads"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig = serde_json::from_str(r#"{"max_threads": 12}"#).unwrap();
        assert_eq!(config.max_threads, 12);
        assert_eq!(config.max_threads_per_task, 2);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(&path, r#"{"max_doc_id_queue_size": 50}"#).unwrap();

        let config = SearchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_doc_id_queue_size, 50);

        std::fs::write(&path, r#"{"max_threads": 0}"#).unwrap();
        assert!(SearchConfig::from_json_file(&path).is_err());
    }
}
