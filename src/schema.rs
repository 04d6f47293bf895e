//! Field metadata consumed by query translation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalyzerType;

/// Declared type of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Analyzed free text.
    Text,
    /// Exact single-term values.
    Keyword,
    /// Integer or floating point numbers.
    Numeric,
    /// Timestamps, indexed as epoch milliseconds.
    Date,
}

impl FieldType {
    /// Whether range conditions compare numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Numeric | FieldType::Date)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Numeric => "numeric",
            FieldType::Date => "date",
        };
        f.write_str(name)
    }
}

/// Metadata of one index field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    /// Field name.
    pub name: String,

    /// Declared type.
    pub field_type: FieldType,

    /// Analyzer used at index time.
    #[serde(default)]
    pub analyzer: AnalyzerType,

    /// Whether terms keep their case. Case-insensitive fields are lower-cased.
    #[serde(default)]
    pub case_sensitive: bool,

    /// Whether values are stored and can be extracted for hits.
    #[serde(default = "default_stored")]
    pub stored: bool,
}

fn default_stored() -> bool {
    true
}

impl IndexField {
    /// Create a field with an explicit type and analyzer.
    pub fn new<S: Into<String>>(name: S, field_type: FieldType, analyzer: AnalyzerType) -> Self {
        Self {
            name: name.into(),
            field_type,
            analyzer,
            case_sensitive: false,
            stored: true,
        }
    }

    /// Create an analyzed text field.
    pub fn text<S: Into<String>>(name: S, analyzer: AnalyzerType) -> Self {
        Self::new(name, FieldType::Text, analyzer)
    }

    /// Create a keyword field.
    pub fn keyword<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Keyword, AnalyzerType::Keyword)
    }

    /// Create a numeric field.
    pub fn numeric<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Numeric, AnalyzerType::Keyword)
    }

    /// Create a date field.
    pub fn date<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Date, AnalyzerType::Keyword)
    }

    /// Set the case policy.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Set whether the field is stored.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Whether values are matched as single unanalyzed terms.
    pub fn is_keyword(&self) -> bool {
        self.field_type == FieldType::Keyword || self.analyzer.is_keyword()
    }
}

/// The field-metadata collaborator.
pub trait FieldMetadata: Send + Sync {
    /// Look up a field by name.
    fn field(&self, name: &str) -> Option<IndexField>;
}

/// A set of index fields keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexFields {
    fields: BTreeMap<String, IndexField>,
}

impl IndexFields {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any field with the same name.
    pub fn add(&mut self, field: IndexField) {
        self.fields.insert(field.name.clone(), field);
    }

    /// Add a field, builder style.
    pub fn with(mut self, field: IndexField) -> Self {
        self.add(field);
        self
    }

    /// Get a field by name.
    pub fn get(&self, name: &str) -> Option<&IndexField> {
        self.fields.get(name)
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexField> {
        self.fields.values()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<IndexField> for IndexFields {
    fn from_iter<I: IntoIterator<Item = IndexField>>(iter: I) -> Self {
        let mut fields = IndexFields::new();
        for field in iter {
            fields.add(field);
        }
        fields
    }
}

impl FieldMetadata for IndexFields {
    fn field(&self, name: &str) -> Option<IndexField> {
        self.fields.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builders() {
        let field = IndexField::text("message", AnalyzerType::Standard).case_sensitive(true);
        assert_eq!(field.field_type, FieldType::Text);
        assert!(field.case_sensitive);
        assert!(!field.is_keyword());

        assert!(IndexField::keyword("host").is_keyword());
        assert!(IndexField::date("event_time").field_type.is_numeric());
    }

    #[test]
    fn test_index_fields_lookup() {
        let fields: IndexFields = vec![IndexField::keyword("host"), IndexField::numeric("bytes")]
            .into_iter()
            .collect();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.field("bytes").unwrap().field_type, FieldType::Numeric);
        assert!(fields.field("missing").is_none());
    }

    #[test]
    fn test_deserialize_fields() {
        let json = r#"{
            "host": {"name": "host", "field_type": "keyword"},
            "message": {"name": "message", "field_type": "text", "analyzer": "standard"}
        }"#;
        let fields: IndexFields = serde_json::from_str(json).unwrap();
        let message = fields.get("message").unwrap();
        assert_eq!(message.analyzer, AnalyzerType::Standard);
        assert!(message.stored);
        assert!(!message.case_sensitive);
    }
}
