//! Command line argument parsing for the shardsearch CLI using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// shardsearch - Search log shards with bounded concurrency
#[derive(Parser, Debug, Clone)]
#[command(name = "shardsearch")]
#[command(about = "Run structured searches across a directory of index shards")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct ShardSearchArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl ShardSearchArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Search a directory of shards
    Search(SearchArgs),

    /// Print the native query an expression translates to
    Translate(TranslateArgs),

    /// List the shards of a directory
    Shards(ShardsArgs),
}

/// Where to read the search expression from.
#[derive(clap::Args, Debug, Clone)]
pub struct ExpressionInput {
    /// Search expression as JSON
    #[arg(value_name = "EXPRESSION", required_unless_present = "expression_file")]
    pub expression: Option<String>,

    /// Read the search expression from a JSON file
    #[arg(short = 'e', long, conflicts_with = "expression")]
    pub expression_file: Option<PathBuf>,

    /// Directory of dictionary files, one word per line, named by dictionary uuid
    #[arg(short, long)]
    pub dictionaries: Option<PathBuf>,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Directory holding one `<name><shard id>.jsonl` file per shard
    #[arg(value_name = "SHARD_DIR")]
    pub shard_dir: PathBuf,

    /// Field schema as a JSON file
    #[arg(short, long)]
    pub schema: PathBuf,

    #[command(flatten)]
    pub input: ExpressionInput,

    /// Stored fields to extract for every hit (comma-separated)
    #[arg(short = 'F', long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Shards to search (comma-separated, default: all)
    #[arg(long, value_delimiter = ',')]
    pub shards: Vec<u64>,

    /// Maximum number of hits to print
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Scheduler configuration as a JSON file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node-wide shard search thread ceiling
    #[arg(long)]
    pub threads: Option<usize>,

    /// Shard search threads one search may use
    #[arg(long)]
    pub threads_per_search: Option<usize>,

    /// Capacity of the document id queue
    #[arg(long)]
    pub queue_size: Option<usize>,

    /// Cancel the search after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print progress events while searching
    #[arg(long)]
    pub progress: bool,
}

impl SearchArgs {
    /// Search timeout requested on the command line.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Arguments for translating an expression
#[derive(Parser, Debug, Clone)]
pub struct TranslateArgs {
    /// Field schema as a JSON file
    #[arg(short, long)]
    pub schema: PathBuf,

    #[command(flatten)]
    pub input: ExpressionInput,

    /// Maximum clauses per boolean query
    #[arg(long)]
    pub max_clauses: Option<usize>,
}

/// Arguments for listing shards
#[derive(Parser, Debug, Clone)]
pub struct ShardsArgs {
    /// Directory holding one `<name><shard id>.jsonl` file per shard
    #[arg(value_name = "SHARD_DIR")]
    pub shard_dir: PathBuf,

    /// Field schema as a JSON file
    #[arg(short, long)]
    pub schema: PathBuf,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity() {
        let args = ShardSearchArgs::parse_from(["shardsearch", "-vv", "shards", "dir", "-s", "fields.json"]);
        assert_eq!(args.verbosity(), 2);

        let args = ShardSearchArgs::parse_from(["shardsearch", "-q", "-v", "shards", "dir", "-s", "fields.json"]);
        assert_eq!(args.verbosity(), 0);

        let args = ShardSearchArgs::parse_from(["shardsearch", "shards", "dir", "-s", "fields.json"]);
        assert_eq!(args.verbosity(), 1);
    }

    #[test]
    fn test_search_args() {
        let args = ShardSearchArgs::parse_from([
            "shardsearch",
            "-f",
            "json",
            "search",
            "shards",
            "-s",
            "fields.json",
            r#"{"field":"host","condition":"equals","value":"a"}"#,
            "-F",
            "host,bytes",
            "--shards",
            "1,3",
            "--timeout-ms",
            "250",
        ]);
        assert_eq!(args.output_format, OutputFormat::Json);
        let Command::Search(search) = args.command else {
            panic!("expected search command");
        };
        assert_eq!(search.fields, vec!["host", "bytes"]);
        assert_eq!(search.shards, vec![1, 3]);
        assert_eq!(search.timeout(), Some(Duration::from_millis(250)));
        assert!(search.input.expression.is_some());
    }

    #[test]
    fn test_expression_required() {
        let result = ShardSearchArgs::try_parse_from(["shardsearch", "translate", "-s", "fields.json"]);
        assert!(result.is_err());

        let args =
            ShardSearchArgs::try_parse_from(["shardsearch", "translate", "-s", "fields.json", "-e", "expr.json"])
                .unwrap();
        let Command::Translate(translate) = args.command else {
            panic!("expected translate command");
        };
        assert!(translate.input.expression.is_none());
    }
}
