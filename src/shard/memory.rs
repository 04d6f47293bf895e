//! In-memory shard engine.
//!
//! [`MemoryShardStore`] plays the part of both the index-metadata
//! collaborator and the shard opener. Each shard is a small inverted index
//! built from documents of `field -> value` pairs: analyzed postings per field,
//! numeric doc values for range queries and stored values for extraction.
//! Shards can be loaded from a directory of JSON lines files, one file per
//! shard.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use bit_vec::BitVec;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Result, SearchError};
use crate::query::native::{BooleanQuery, Bound, NativeQuery, Occur, RangeQuery, RangeValue};
use crate::query::translator::parse_date;
use crate::query::wildcard::{compile_anchored, compile_wildcard};
use crate::schema::{FieldType, IndexField, IndexFields};
use crate::shard::{DocOrdinal, HitCollector, IndexMetadata, ShardId, ShardLocation, ShardOpener, ShardSearcher};

/// A document: field name to raw value.
pub type Document = BTreeMap<String, String>;

/// Build a document from pairs.
pub fn document<K, V, I>(pairs: I) -> Document
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NumericValue {
    Long(i64),
    Double(f64),
}

impl NumericValue {
    fn parse(field: &IndexField, value: &str) -> Option<Self> {
        if field.field_type == FieldType::Date {
            return parse_date(value).map(NumericValue::Long);
        }
        let value = value.trim();
        if let Ok(n) = value.parse::<i64>() {
            return Some(NumericValue::Long(n));
        }
        value.parse::<f64>().ok().filter(|n| n.is_finite()).map(NumericValue::Double)
    }

    fn as_f64(self) -> f64 {
        match self {
            NumericValue::Long(n) => n as f64,
            NumericValue::Double(n) => n,
        }
    }

    /// Compare with a range bound value. `None` for text bounds.
    fn compare(self, bound: &RangeValue) -> Option<std::cmp::Ordering> {
        match (self, bound) {
            (NumericValue::Long(a), RangeValue::Long(b)) => Some(a.cmp(b)),
            (_, RangeValue::Long(b)) => self.as_f64().partial_cmp(&(*b as f64)),
            (_, RangeValue::Double(b)) => self.as_f64().partial_cmp(b),
            (_, RangeValue::Text(_)) => None,
        }
    }
}

/// The immutable index data of one shard version.
#[derive(Debug, Default)]
struct ShardData {
    doc_count: u32,

    /// field -> term -> documents.
    postings: AHashMap<String, BTreeMap<String, BitVec>>,

    /// field -> per-document numeric value.
    doc_values: AHashMap<String, Vec<Option<NumericValue>>>,

    /// Stored values per document.
    stored: Vec<Document>,
}

impl ShardData {
    fn build(fields: &IndexFields, documents: Vec<Document>) -> Self {
        let doc_count = documents.len();
        let mut data = ShardData {
            doc_count: doc_count as u32,
            ..Default::default()
        };

        for (ordinal, doc) in documents.iter().enumerate() {
            for (name, value) in doc {
                let Some(field) = fields.get(name) else {
                    continue;
                };

                if field.field_type.is_numeric() {
                    let parsed = NumericValue::parse(field, value);
                    if parsed.is_none() {
                        warn!(field = %name, value = %value, "ignoring unparseable numeric value");
                    }
                    data.doc_values
                        .entry(name.clone())
                        .or_insert_with(|| vec![None; doc_count])[ordinal] = parsed;
                    continue;
                }

                let terms = field.analyzer.analyze(value, field.case_sensitive);
                let postings = data.postings.entry(name.clone()).or_default();
                for term in terms {
                    postings
                        .entry(term)
                        .or_insert_with(|| BitVec::from_elem(doc_count, false))
                        .set(ordinal, true);
                }
            }
        }

        data.stored = documents
            .into_iter()
            .map(|doc| {
                doc.into_iter()
                    .filter(|(name, _)| fields.get(name).is_none_or(|field| field.stored))
                    .collect()
            })
            .collect();
        data
    }

    fn empty(&self) -> BitVec {
        BitVec::from_elem(self.doc_count as usize, false)
    }

    fn evaluate(&self, query: &NativeQuery) -> Result<BitVec> {
        match query {
            NativeQuery::MatchAll => Ok(BitVec::from_elem(self.doc_count as usize, true)),
            NativeQuery::Term { field, text } => Ok(self
                .postings
                .get(field)
                .and_then(|terms| terms.get(text))
                .cloned()
                .unwrap_or_else(|| self.empty())),
            NativeQuery::Wildcard { field, pattern } => {
                let regex = compile_wildcard(pattern, false)
                    .map_err(|e| SearchError::internal(format!("Invalid wildcard {pattern}: {e}")))?;
                Ok(self.matching_terms(field, &regex))
            }
            NativeQuery::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                let regex = compile_anchored(pattern, *case_insensitive)
                    .map_err(|e| SearchError::internal(format!("Invalid regex {pattern}: {e}")))?;
                Ok(self.matching_terms(field, &regex))
            }
            NativeQuery::Range(range) => Ok(self.range(range)),
            NativeQuery::Boolean(boolean) => self.boolean(boolean),
        }
    }

    fn matching_terms(&self, field: &str, regex: &Regex) -> BitVec {
        let mut result = self.empty();
        if let Some(terms) = self.postings.get(field) {
            for (term, docs) in terms {
                if regex.is_match(term) {
                    result.or(docs);
                }
            }
        }
        result
    }

    fn range(&self, range: &RangeQuery) -> BitVec {
        let mut result = self.empty();

        if let Some(values) = self.doc_values.get(&range.field) {
            for (ordinal, value) in values.iter().enumerate() {
                if value.is_some_and(|v| in_numeric_range(v, range)) {
                    result.set(ordinal, true);
                }
            }
        } else if let Some(terms) = self.postings.get(&range.field) {
            for (term, docs) in terms {
                if in_text_range(term, range) {
                    result.or(docs);
                }
            }
        }
        result
    }

    fn boolean(&self, boolean: &BooleanQuery) -> Result<BitVec> {
        let has_must = boolean.has_occur(Occur::Must);
        let mut must: Option<BitVec> = None;
        let mut should = self.empty();
        let mut must_not = self.empty();

        for clause in boolean.clauses() {
            let docs = self.evaluate(&clause.query)?;
            match clause.occur {
                Occur::Must => match must.as_mut() {
                    Some(acc) => {
                        acc.and(&docs);
                    }
                    None => must = Some(docs),
                },
                Occur::Should => {
                    should.or(&docs);
                }
                Occur::MustNot => {
                    must_not.or(&docs);
                }
            }
        }

        let mut result = match (has_must, must) {
            (true, Some(must)) => must,
            _ => should,
        };
        result.difference(&must_not);
        Ok(result)
    }
}

fn in_numeric_range(value: NumericValue, range: &RangeQuery) -> bool {
    use std::cmp::Ordering::*;

    let lower_ok = match &range.lower {
        Bound::Included(b) => matches!(value.compare(b), Some(Greater | Equal)),
        Bound::Excluded(b) => matches!(value.compare(b), Some(Greater)),
        Bound::Unbounded => true,
    };
    let upper_ok = match &range.upper {
        Bound::Included(b) => matches!(value.compare(b), Some(Less | Equal)),
        Bound::Excluded(b) => matches!(value.compare(b), Some(Less)),
        Bound::Unbounded => true,
    };
    lower_ok && upper_ok
}

fn in_text_range(term: &str, range: &RangeQuery) -> bool {
    let lower_ok = match &range.lower {
        Bound::Included(RangeValue::Text(b)) => term >= b.as_str(),
        Bound::Excluded(RangeValue::Text(b)) => term > b.as_str(),
        Bound::Unbounded => true,
        _ => false,
    };
    let upper_ok = match &range.upper {
        Bound::Included(RangeValue::Text(b)) => term <= b.as_str(),
        Bound::Excluded(RangeValue::Text(b)) => term < b.as_str(),
        Bound::Unbounded => true,
        _ => false,
    };
    lower_ok && upper_ok
}

/// Shared switches the store flips on searchers it has handed out.
#[derive(Debug, Default)]
struct Faults {
    fail_search: AtomicBool,
}

#[derive(Debug, Default)]
struct StoreCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    hit_delay_micros: AtomicU64,
}

/// An opened searcher over one shard version.
#[derive(Debug)]
pub struct MemoryShard {
    shard_id: ShardId,
    version: u64,
    data: Arc<ShardData>,
    faults: Arc<Faults>,
    counters: Arc<StoreCounters>,
    closed: AtomicBool,
}

impl MemoryShard {
    /// Build a standalone searcher over documents.
    pub fn build(shard_id: ShardId, fields: &IndexFields, documents: Vec<Document>) -> Self {
        Self {
            shard_id,
            version: 1,
            data: Arc::new(ShardData::build(fields, documents)),
            faults: Arc::default(),
            counters: Arc::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// The shard this searcher reads.
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// The shard version this searcher was opened at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether [`ShardSearcher::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SearchError::shard_search(self.shard_id, "searcher is closed"));
        }
        Ok(())
    }
}

impl ShardSearcher for MemoryShard {
    fn doc_count(&self) -> u32 {
        self.data.doc_count
    }

    fn search(&self, query: &NativeQuery, collector: &mut dyn HitCollector) -> Result<()> {
        self.check_open()?;
        if self.faults.fail_search.load(Ordering::Acquire) {
            return Err(SearchError::shard_search(self.shard_id, "simulated read failure"));
        }

        let matches = self.data.evaluate(query)?;
        let delay = Duration::from_micros(self.counters.hit_delay_micros.load(Ordering::Relaxed));

        for (ordinal, matched) in matches.iter().enumerate() {
            if !matched {
                continue;
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if collector.collect(ordinal as DocOrdinal).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn stored_values(&self, ordinal: DocOrdinal, field_names: &[String]) -> Result<Vec<Option<String>>> {
        self.check_open()?;
        let doc = self.data.stored.get(ordinal as usize).ok_or_else(|| {
            SearchError::shard_search(self.shard_id, format!("no document with ordinal {ordinal}"))
        })?;
        Ok(field_names.iter().map(|name| doc.get(name).cloned()).collect())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            debug!(shard = %self.shard_id, version = self.version, "closed memory shard");
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StoredShard {
    location: ShardLocation,
    data: Arc<ShardData>,
    faults: Arc<Faults>,
    open_failure: Option<String>,
}

/// A set of in-memory shards sharing one field schema.
#[derive(Debug)]
pub struct MemoryShardStore {
    fields: IndexFields,
    shards: RwLock<BTreeMap<ShardId, StoredShard>>,
    counters: Arc<StoreCounters>,
}

impl MemoryShardStore {
    /// Create an empty store.
    pub fn new(fields: IndexFields) -> Self {
        Self {
            fields,
            shards: RwLock::new(BTreeMap::new()),
            counters: Arc::default(),
        }
    }

    /// The field schema.
    pub fn fields(&self) -> &IndexFields {
        &self.fields
    }

    /// Add a shard, or replace it with a new version.
    pub fn add_shard(&self, shard: ShardId, documents: Vec<Document>) {
        self.add_shard_at(shard, PathBuf::from(format!("memory/{shard}")), documents);
    }

    fn add_shard_at(&self, shard: ShardId, path: PathBuf, documents: Vec<Document>) {
        let data = Arc::new(ShardData::build(&self.fields, documents));
        let mut shards = self.shards.write();
        let version = shards.get(&shard).map_or(1, |s| s.location.version + 1);
        shards.insert(
            shard,
            StoredShard {
                location: ShardLocation::new(path, version),
                data,
                faults: Arc::default(),
                open_failure: None,
            },
        );
    }

    /// Remove a shard.
    pub fn remove_shard(&self, shard: ShardId) -> bool {
        self.shards.write().remove(&shard).is_some()
    }

    /// Make opening the shard fail with `reason`.
    pub fn fail_open<S: Into<String>>(&self, shard: ShardId, reason: S) {
        if let Some(stored) = self.shards.write().get_mut(&shard) {
            stored.open_failure = Some(reason.into());
        }
    }

    /// Make searches on the shard's searchers fail.
    pub fn fail_search(&self, shard: ShardId) {
        if let Some(stored) = self.shards.read().get(&shard) {
            stored.faults.fail_search.store(true, Ordering::Release);
        }
    }

    /// Clear injected failures for the shard.
    pub fn heal(&self, shard: ShardId) {
        if let Some(stored) = self.shards.write().get_mut(&shard) {
            stored.open_failure = None;
            stored.faults.fail_search.store(false, Ordering::Release);
        }
    }

    /// Slow every hit down by `delay`.
    pub fn set_hit_delay(&self, delay: Duration) {
        self.counters
            .hit_delay_micros
            .store(delay.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of searchers opened so far.
    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::Relaxed)
    }

    /// Number of searchers closed so far.
    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::Relaxed)
    }

    /// Load one shard per `*.jsonl` file in a directory.
    ///
    /// The shard id is taken from the trailing digits of the file stem
    /// (`shard-7.jsonl` is shard 7). Each line is a JSON object of field
    /// values.
    pub fn load_dir<P: AsRef<Path>>(dir: P, fields: IndexFields) -> Result<Self> {
        let store = Self::new(fields);

        let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        let mut taken: HashMap<ShardId, PathBuf> = HashMap::new();
        for path in paths {
            let shard = shard_id_from_path(&path).ok_or_else(|| {
                SearchError::invalid_config(format!("Cannot derive a shard id from {}", path.display()))
            })?;
            if let Some(previous) = taken.insert(shard, path.clone()) {
                return Err(SearchError::invalid_config(format!(
                    "Shard {shard} is defined by both {} and {}",
                    previous.display(),
                    path.display()
                )));
            }

            let documents = read_documents(&path)?;
            debug!(shard = %shard, path = %path.display(), docs = documents.len(), "loaded shard file");
            store.add_shard_at(shard, path, documents);
        }

        Ok(store)
    }
}

impl IndexMetadata for MemoryShardStore {
    fn list_shards(&self) -> Result<Vec<ShardId>> {
        Ok(self.shards.read().keys().copied().collect())
    }

    fn shard_location(&self, shard: ShardId) -> Result<ShardLocation> {
        self.shards
            .read()
            .get(&shard)
            .map(|s| s.location.clone())
            .ok_or_else(|| SearchError::shard_unavailable(shard, "unknown shard"))
    }
}

impl ShardOpener for MemoryShardStore {
    fn open(&self, shard: ShardId, location: &ShardLocation) -> Result<Arc<dyn ShardSearcher>> {
        let shards = self.shards.read();
        let stored = shards
            .get(&shard)
            .ok_or_else(|| SearchError::shard_unavailable(shard, "unknown shard"))?;

        if let Some(reason) = &stored.open_failure {
            return Err(SearchError::shard_unavailable(shard, reason.clone()));
        }
        if stored.location.version != location.version {
            return Err(SearchError::shard_unavailable(
                shard,
                format!(
                    "version {} requested but {} is current",
                    location.version, stored.location.version
                ),
            ));
        }

        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryShard {
            shard_id: shard,
            version: location.version,
            data: Arc::clone(&stored.data),
            faults: Arc::clone(&stored.faults),
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
        }))
    }
}

fn shard_id_from_path(path: &Path) -> Option<ShardId> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse::<u64>().ok().map(ShardId)
}

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(path)?);
    let mut documents = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)?;
        let doc = object
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((name, value))
            })
            .collect();
        documents.push(doc);
    }
    Ok(documents)
}

/// Collect all hits of a query into a vector.
pub fn collect_all(searcher: &dyn ShardSearcher, query: &NativeQuery) -> Result<Vec<DocOrdinal>> {
    let mut hits = Vec::new();
    searcher.search(query, &mut |ordinal: DocOrdinal| {
        hits.push(ordinal);
        ControlFlow::Continue(())
    })?;
    Ok(hits)
}
