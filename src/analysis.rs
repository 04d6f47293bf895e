//! Text analysis shared by query translation and the in-memory shard.
//!
//! Each field declares an [`AnalyzerType`] and a case policy. Documents are
//! analyzed with [`AnalyzerType::analyze`] when they are indexed and term
//! values with [`AnalyzerType::analyze_query`] when a query is translated, so
//! both sides agree on token boundaries and case folding.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

const DEFAULT_ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// The analyzers a field can be indexed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerType {
    /// The whole value is a single term.
    #[default]
    Keyword,
    /// Runs of letters.
    Alpha,
    /// Runs of digits.
    Numeric,
    /// Runs of letters and digits.
    AlphaNumeric,
    /// Whitespace separated words.
    Whitespace,
    /// Unicode words with English stop words removed.
    Stop,
    /// Unicode words (UAX #29).
    Standard,
}

impl AnalyzerType {
    /// Whether values are matched as single, unanalyzed terms.
    pub fn is_keyword(&self) -> bool {
        matches!(self, AnalyzerType::Keyword)
    }

    /// Get the analyzer name.
    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerType::Keyword => "keyword",
            AnalyzerType::Alpha => "alpha",
            AnalyzerType::Numeric => "numeric",
            AnalyzerType::AlphaNumeric => "alpha_numeric",
            AnalyzerType::Whitespace => "whitespace",
            AnalyzerType::Stop => "stop",
            AnalyzerType::Standard => "standard",
        }
    }

    /// Split an indexed value into terms.
    pub fn analyze(&self, text: &str, case_sensitive: bool) -> Vec<String> {
        self.tokens(text, false, case_sensitive)
    }

    /// Split a query value into terms, keeping `*` and `?` wildcards inside terms.
    pub fn analyze_query(&self, text: &str, case_sensitive: bool) -> Vec<String> {
        self.tokens(text, true, case_sensitive)
    }

    fn tokens(&self, text: &str, wildcards: bool, case_sensitive: bool) -> Vec<String> {
        let raw: Vec<&str> = match self {
            AnalyzerType::Keyword => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed]
                }
            }
            AnalyzerType::Alpha => split_runs(text, |c| c.is_alphabetic(), wildcards),
            AnalyzerType::Numeric => split_runs(text, |c| c.is_ascii_digit(), wildcards),
            AnalyzerType::AlphaNumeric => split_runs(text, |c| c.is_alphanumeric(), wildcards),
            AnalyzerType::Whitespace => text.split_whitespace().collect(),
            AnalyzerType::Standard | AnalyzerType::Stop => {
                if wildcards && has_wildcard(text) {
                    split_runs(text, |c| c.is_alphanumeric() || c == '_', true)
                } else {
                    text.unicode_words().collect()
                }
            }
        };

        raw.into_iter()
            .map(|token| {
                if case_sensitive {
                    token.to_string()
                } else {
                    token.to_lowercase()
                }
            })
            .filter(|token| {
                !(matches!(self, AnalyzerType::Stop)
                    && DEFAULT_ENGLISH_STOP_WORDS.contains(&token.to_lowercase().as_str()))
            })
            .collect()
    }
}

impl fmt::Display for AnalyzerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a term contains a `*` or `?` wildcard.
pub fn has_wildcard(term: &str) -> bool {
    term.contains('*') || term.contains('?')
}

fn split_runs(text: &str, is_token_char: impl Fn(char) -> bool, wildcards: bool) -> Vec<&str> {
    let keep = |c: char| is_token_char(c) || (wildcards && (c == '*' || c == '?'));

    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (keep(c), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push(&text[s..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_is_single_term() {
        let tokens = AnalyzerType::Keyword.analyze("  Host-01.Example ", false);
        assert_eq!(tokens, vec!["host-01.example"]);

        let tokens = AnalyzerType::Keyword.analyze("Host-01", true);
        assert_eq!(tokens, vec!["Host-01"]);

        assert!(AnalyzerType::Keyword.analyze("   ", false).is_empty());
    }

    #[test]
    fn test_alpha_numeric_runs() {
        let tokens = AnalyzerType::AlphaNumeric.analyze("user=jbloggs; id=42", false);
        assert_eq!(tokens, vec!["user", "jbloggs", "id", "42"]);

        let tokens = AnalyzerType::Alpha.analyze("abc123def", false);
        assert_eq!(tokens, vec!["abc", "def"]);

        let tokens = AnalyzerType::Numeric.analyze("port 8080 pid 17", false);
        assert_eq!(tokens, vec!["8080", "17"]);
    }

    #[test]
    fn test_standard_and_stop() {
        let tokens = AnalyzerType::Standard.analyze("The Location of the server", false);
        assert_eq!(tokens, vec!["the", "location", "of", "the", "server"]);

        let tokens = AnalyzerType::Stop.analyze("The Location of the server", false);
        assert_eq!(tokens, vec!["location", "server"]);
    }

    #[test]
    fn test_query_analysis_keeps_wildcards() {
        let tokens = AnalyzerType::AlphaNumeric.analyze_query("loc* server?", false);
        assert_eq!(tokens, vec!["loc*", "server?"]);

        let tokens = AnalyzerType::Standard.analyze_query("LOC*", false);
        assert_eq!(tokens, vec!["loc*"]);

        let tokens = AnalyzerType::AlphaNumeric.analyze("loc* server?", false);
        assert_eq!(tokens, vec!["loc", "server"]);
    }
}
