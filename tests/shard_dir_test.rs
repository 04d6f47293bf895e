//! Integration tests for searching shards loaded from a directory of JSON lines files.

use std::fs;
use std::sync::Arc;

use shardsearch::prelude::*;
use tempfile::TempDir;

fn write_shards(dir: &TempDir) {
    fs::write(
        dir.path().join("events-1.jsonl"),
        concat!(
            "{\"host\":\"web-01\",\"status\":200,\"message\":\"GET /index.html\"}\n",
            "{\"host\":\"web-02\",\"status\":503,\"message\":\"Upstream timeout\"}\n",
        ),
    )
    .unwrap();
    fs::write(
        dir.path().join("events-2.jsonl"),
        concat!(
            "{\"host\":\"db-01\",\"status\":500,\"message\":\"Disk full\"}\n",
            "\n",
            "{\"host\":\"web-01\",\"status\":null,\"message\":\"timeout while reading\"}\n",
        ),
    )
    .unwrap();
    fs::write(dir.path().join("README.txt"), "not a shard").unwrap();
}

fn fields() -> IndexFields {
    IndexFields::new()
        .with(IndexField::keyword("host"))
        .with(IndexField::numeric("status"))
        .with(IndexField::text("message", AnalyzerType::Standard))
}

#[test]
fn test_search_loaded_directory() -> Result<()> {
    let dir = TempDir::new().unwrap();
    write_shards(&dir);

    let store = Arc::new(MemoryShardStore::load_dir(dir.path(), fields())?);
    let cache = Arc::new(ShardSearcherCache::new(
        CacheConfig::default(),
        store.clone(),
        store.clone(),
    ));
    let report = cache.refresh()?;
    assert_eq!(report.opened, vec![ShardId(1), ShardId(2)]);

    let scheduler = SearchScheduler::new(
        SearchConfig::default(),
        Arc::clone(&cache),
        Arc::new(fields()),
        Arc::new(MemoryDictionaryStore::new()),
    )?;

    let expression = Expression::or(vec![
        Term::contains("message", "TIMEOUT").into(),
        Term::new("status", Condition::GreaterThanOrEqualTo, "500").into(),
    ]);
    let receiver = Arc::new(CollectingHitReceiver::new());
    let shards = cache.list_shards()?;
    let outcome = scheduler.search_blocking(
        &expression,
        &shards,
        &["host".to_string(), "status".to_string()],
        receiver.clone(),
    )?;

    assert!(outcome.is_complete());
    assert_eq!(outcome.hit_count, 3);

    let rows: Vec<(ShardId, Vec<Option<String>>)> = receiver
        .hits()
        .into_iter()
        .map(|(shard, hit)| (shard, hit.values))
        .collect();
    assert_eq!(
        rows,
        vec![
            (ShardId(1), vec![Some("web-02".to_string()), Some("503".to_string())]),
            (ShardId(2), vec![Some("db-01".to_string()), Some("500".to_string())]),
            (ShardId(2), vec![Some("web-01".to_string()), None]),
        ]
    );
    Ok(())
}

#[test]
fn test_conflicting_shard_files_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a-1.jsonl"), "{}\n").unwrap();
    fs::write(dir.path().join("b-1.jsonl"), "{}\n").unwrap();

    let result = MemoryShardStore::load_dir(dir.path(), fields());
    assert!(matches!(result, Err(SearchError::InvalidConfig(_))));
}
