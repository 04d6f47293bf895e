//! Command implementations for the shardsearch CLI.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{CacheConfig, SearchConfig};
use crate::dictionary::MemoryDictionaryStore;
use crate::error::{Result, SearchError};
use crate::expression::Expression;
use crate::query::QueryTranslator;
use crate::schema::IndexFields;
use crate::search::{CollectingHitReceiver, SearchEvent, SearchScheduler};
use crate::shard::{MemoryShardStore, ShardId, ShardSearcherCache};

/// Execute a CLI command.
pub fn execute_command(args: ShardSearchArgs) -> Result<()> {
    match &args.command {
        Command::Search(search_args) => search_shards(search_args.clone(), &args),
        Command::Translate(translate_args) => translate_expression(translate_args.clone(), &args),
        Command::Shards(shards_args) => list_shards(shards_args.clone(), &args),
    }
}

/// Search a shard directory.
fn search_shards(args: SearchArgs, cli_args: &ShardSearchArgs) -> Result<()> {
    let fields = load_fields(&args.schema)?;
    let expression = load_expression(&args.input)?;
    let dictionaries = load_dictionaries(args.input.dictionaries.as_deref())?;
    let config = build_config(&args)?;

    let store = Arc::new(MemoryShardStore::load_dir(&args.shard_dir, fields.clone())?);
    let cache = Arc::new(ShardSearcherCache::new(
        CacheConfig::default(),
        store.clone(),
        store.clone(),
    ));
    let report = cache.refresh()?;
    debug!(opened = report.opened.len(), failed = report.failed.len(), "warmed shard cache");

    let shard_ids: Vec<ShardId> = if args.shards.is_empty() {
        cache.list_shards()?
    } else {
        args.shards.iter().copied().map(ShardId).collect()
    };

    let scheduler = SearchScheduler::new(config, cache, Arc::new(fields), Arc::new(dictionaries))?;
    let translated = scheduler.translate(&expression)?;
    info!(query = %translated, shards = shard_ids.len(), "searching");

    let receiver = Arc::new(CollectingHitReceiver::new());
    let handle = scheduler.submit_query(translated.query.clone(), &shard_ids, &args.fields, receiver.clone())?;

    for event in handle.events().iter() {
        match event {
            SearchEvent::Progress {
                shard_index,
                shard_total,
                hits,
            } if args.progress => {
                eprintln!("shard {}/{}: {hits} hits so far", shard_index + 1, shard_total);
            }
            SearchEvent::ShardFailed(error) if cli_args.verbosity() > 1 => eprintln!("{error}"),
            SearchEvent::Completed(_) => break,
            _ => {}
        }
    }
    let outcome = handle.wait()?;

    let results = SearchResults::from_batches(translated.to_string(), receiver.take(), args.limit, outcome);
    output_result(&results, cli_args)
}

/// Print the native form of an expression.
fn translate_expression(args: TranslateArgs, cli_args: &ShardSearchArgs) -> Result<()> {
    let fields = load_fields(&args.schema)?;
    let expression = load_expression(&args.input)?;
    let dictionaries = load_dictionaries(args.input.dictionaries.as_deref())?;

    let mut translator = QueryTranslator::new(&fields, &dictionaries);
    if let Some(max) = args.max_clauses {
        translator = translator.with_max_clause_count(max);
    }
    let translated = translator.translate(&expression)?;

    let result = TranslationResult {
        query: translated.to_string(),
        highlights: translated.highlights.into_iter().collect(),
    };
    output_result(&result, cli_args)
}

/// List the shards of a directory with their document counts.
fn list_shards(args: ShardsArgs, cli_args: &ShardSearchArgs) -> Result<()> {
    let fields = load_fields(&args.schema)?;
    let store = Arc::new(MemoryShardStore::load_dir(&args.shard_dir, fields)?);
    let cache = ShardSearcherCache::new(CacheConfig::default(), store.clone(), store);

    let mut listing = ShardListing {
        shards: Vec::new(),
        unavailable: Vec::new(),
    };
    for shard in cache.list_shards()? {
        match cache.acquire(shard) {
            Ok(lease) => listing.shards.push(ShardSummary {
                shard,
                documents: lease.doc_count(),
                generation: lease.generation(),
            }),
            Err(e) => listing.unavailable.push(e.to_string()),
        }
    }
    output_result(&listing, cli_args)
}

/// Load the field schema: a JSON object mapping field names to field definitions.
fn load_fields(path: &Path) -> Result<IndexFields> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read schema {}", path.display()))?;
    let fields: IndexFields = serde_json::from_str(&text)?;
    if fields.is_empty() {
        return Err(SearchError::invalid_config(format!(
            "Schema {} defines no fields",
            path.display()
        )));
    }
    Ok(fields)
}

fn load_expression(input: &ExpressionInput) -> Result<Expression> {
    let text = match (&input.expression, &input.expression_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read expression {}", path.display()))?,
        (None, None) => return Err(SearchError::invalid_config("No search expression given")),
    };
    Ok(serde_json::from_str(&text)?)
}

/// Load every file of a directory as a dictionary named by its file stem.
fn load_dictionaries(dir: Option<&Path>) -> Result<MemoryDictionaryStore> {
    let store = MemoryDictionaryStore::new();
    let Some(dir) = dir else {
        return Ok(store);
    };

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read dictionaries {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(uuid) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let text = fs::read_to_string(&path)?;
        debug!(dictionary = uuid, path = %path.display(), "loaded dictionary");
        store.insert(uuid, text);
    }
    Ok(store)
}

/// Scheduler configuration from the config file and command line overrides.
fn build_config(args: &SearchArgs) -> Result<SearchConfig> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::from_json_file(path)?,
        None => SearchConfig::default(),
    };
    if let Some(threads) = args.threads {
        config = config.with_max_threads(threads);
    }
    if let Some(threads) = args.threads_per_search {
        config = config.with_max_threads_per_task(threads);
    }
    if let Some(size) = args.queue_size {
        config = config.with_queue_size(size);
    }
    if let Some(timeout) = args.timeout() {
        config = config.with_timeout(timeout);
    }
    config.validate()?;
    Ok(config)
}
