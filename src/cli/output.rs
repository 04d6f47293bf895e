//! Output formatting for CLI commands.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ShardSearchArgs};
use crate::error::Result;
use crate::search::{HitBatch, SearchOutcome};
use crate::shard::ShardId;

/// One hit as printed by the `search` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitRow {
    pub shard: ShardId,
    pub ordinal: u32,
    pub fields: BTreeMap<String, Option<String>>,
}

/// Result structure for search operations.
#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<HitRow>,
    pub truncated: bool,
    pub outcome: SearchOutcome,
}

impl SearchResults {
    /// Flatten received batches into rows ordered by shard and ordinal.
    pub fn from_batches(query: String, batches: Vec<HitBatch>, limit: Option<usize>, outcome: SearchOutcome) -> Self {
        let mut hits: Vec<HitRow> = batches
            .into_iter()
            .flat_map(|batch| {
                let HitBatch {
                    shard_id,
                    field_names,
                    hits,
                } = batch;
                hits.into_iter().map(move |hit| HitRow {
                    shard: shard_id,
                    ordinal: hit.ordinal,
                    fields: field_names.iter().cloned().zip(hit.values).collect(),
                })
            })
            .collect();
        hits.sort_by_key(|row| (row.shard, row.ordinal));

        let truncated = limit.is_some_and(|limit| hits.len() > limit);
        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        Self {
            query,
            hits,
            truncated,
            outcome,
        }
    }
}

/// Result structure for translation.
#[derive(Debug, Serialize)]
pub struct TranslationResult {
    pub query: String,
    pub highlights: Vec<String>,
}

/// One shard of a directory.
#[derive(Debug, Serialize)]
pub struct ShardSummary {
    pub shard: ShardId,
    pub documents: u32,
    pub generation: u64,
}

/// Result structure for shard listing.
#[derive(Debug, Serialize)]
pub struct ShardListing {
    pub shards: Vec<ShardSummary>,
    pub unavailable: Vec<String>,
}

/// Output a result in the requested format.
pub fn output_result<T: Serialize + HumanOutput>(result: &T, args: &ShardSearchArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            print!("{}", result.render_human(args.verbosity()));
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &ShardSearchArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Human readable rendering of a command result.
pub trait HumanOutput {
    /// Render for a terminal. Verbosity 0 prints only the essentials.
    fn render_human(&self, verbosity: u8) -> String;
}

impl HumanOutput for SearchResults {
    fn render_human(&self, verbosity: u8) -> String {
        let mut out = String::new();
        if verbosity > 1 {
            out.push_str(&format!("Query: {}\n\n", self.query));
        }

        for hit in &self.hits {
            out.push_str(&format!("[shard {} #{}]", hit.shard, hit.ordinal));
            for (name, value) in &hit.fields {
                let value = value.as_deref().unwrap_or("-");
                out.push_str(&format!(" {name}={value}"));
            }
            out.push('\n');
        }

        if verbosity > 0 {
            let outcome = &self.outcome;
            out.push('\n');
            out.push_str(&format!("Total hits: {}\n", outcome.hit_count));
            if self.truncated {
                out.push_str(&format!("Shown: {}\n", self.hits.len()));
            }
            out.push_str(&format!(
                "Shards searched: {}/{}\n",
                outcome.shards_searched, outcome.shards_total
            ));
            out.push_str(&format!("Search time: {}ms\n", outcome.elapsed.as_millis()));
            if outcome.cancelled {
                out.push_str("Search was cancelled, results are partial\n");
            }
            for error in &outcome.shard_errors {
                out.push_str(&format!("Warning: {error}\n"));
            }
            for error in &outcome.extraction_errors {
                out.push_str(&format!("Warning: value extraction failed: {error}\n"));
            }
        }
        out
    }
}

impl HumanOutput for TranslationResult {
    fn render_human(&self, verbosity: u8) -> String {
        let mut out = format!("{}\n", self.query);
        if verbosity > 1 && !self.highlights.is_empty() {
            out.push_str(&format!("Highlights: {}\n", self.highlights.join(", ")));
        }
        out
    }
}

impl HumanOutput for ShardListing {
    fn render_human(&self, verbosity: u8) -> String {
        let mut out = String::new();
        if verbosity > 0 {
            out.push_str("Shard      Documents  Generation\n");
        }
        for shard in &self.shards {
            out.push_str(&format!(
                "{:<10} {:>9}  {:>10}\n",
                shard.shard.to_string(),
                shard.documents,
                shard.generation
            ));
        }
        for error in &self.unavailable {
            out.push_str(&format!("Warning: {error}\n"));
        }
        out
    }
}
