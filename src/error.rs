//! Error types for the shardsearch library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`SearchError`] enum. Query translation failures have their own enum,
//! [`TranslationError`], because they are raised before any shard work starts
//! and callers usually want to show them to the user verbatim.
//!
//! # Examples
//!
//! ```
//! use shardsearch::error::{Result, SearchError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SearchError::invalid_config("max_threads must be greater than zero"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

use crate::shard::ShardId;

/// The main error type for shardsearch operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The expression could not be turned into a native query.
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// A shard could not be opened (missing, corrupt, unreadable).
    #[error("Shard {shard} unavailable: {reason}")]
    ShardUnavailable { shard: ShardId, reason: String },

    /// A fault occurred while scanning an opened shard.
    #[error("Shard {shard} search failed: {reason}")]
    ShardSearch { shard: ShardId, reason: String },

    /// An internal coordination invariant was broken.
    #[error("Queue protocol violation: {0}")]
    QueueProtocolViolation(String),

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SearchError.
pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Create a new shard unavailable error.
    pub fn shard_unavailable<S: Into<String>>(shard: ShardId, reason: S) -> Self {
        SearchError::ShardUnavailable {
            shard,
            reason: reason.into(),
        }
    }

    /// Create a new shard search error.
    pub fn shard_search<S: Into<String>>(shard: ShardId, reason: S) -> Self {
        SearchError::ShardSearch {
            shard,
            reason: reason.into(),
        }
    }

    /// Create a new queue protocol violation error.
    pub fn protocol_violation<S: Into<String>>(msg: S) -> Self {
        SearchError::QueueProtocolViolation(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SearchError::Cancelled(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        SearchError::InvalidConfig(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        SearchError::Internal(msg.into())
    }

    /// The shard this error belongs to, for per-shard failures.
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            SearchError::ShardUnavailable { shard, .. } | SearchError::ShardSearch { shard, .. } => {
                Some(*shard)
            }
            _ => None,
        }
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled(_))
    }
}

/// Reasons an expression tree cannot be translated into a native query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// The expression contains no enabled terms.
    #[error("No search terms have been specified")]
    EmptyExpression,

    /// A term names a field that is not in the index.
    #[error("Field not found in index: {0}")]
    UnknownField(String),

    /// A term has no field name.
    #[error("Field not set")]
    MissingField,

    /// The condition cannot be applied to a field of this type.
    #[error("Unexpected condition '{condition}' for {field_type} field '{field}'")]
    UnsupportedCondition {
        field: String,
        field_type: String,
        condition: String,
    },

    /// The dictionary reference is missing or could not be resolved.
    #[error("Dictionary {0} could not be resolved")]
    UnresolvedDictionary(String),

    /// The term value could not be parsed for the field.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// A boolean node has more clauses than allowed.
    #[error("Boolean query has {count} clauses, the maximum is {max}")]
    TooManyClauses { count: usize, max: usize },
}

impl TranslationError {
    /// Create a new invalid value error.
    pub fn invalid_value<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        TranslationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = SearchError::shard_unavailable(ShardId(3), "corrupt segment");
        assert_eq!(error.to_string(), "Shard 3 unavailable: corrupt segment");
        assert_eq!(error.shard(), Some(ShardId(3)));

        let error = SearchError::invalid_config("max_threads is zero");
        assert_eq!(error.to_string(), "Invalid configuration: max_threads is zero");
        assert_eq!(error.shard(), None);
    }

    #[test]
    fn test_translation_error_conversion() {
        let error: SearchError = TranslationError::UnknownField("host".to_string()).into();
        match error {
            SearchError::Translation(TranslationError::UnknownField(field)) => {
                assert_eq!(field, "host")
            }
            _ => panic!("Expected translation error variant"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let search_error = SearchError::from(io_error);

        match search_error {
            SearchError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
