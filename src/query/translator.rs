//! Translation of expression trees into native queries.
//!
//! The translator walks an [`Expression`] once per search and produces a
//! [`NativeQuery`] that every shard task shares. Field types and analyzers
//! come from a [`FieldMetadata`] lookup, dictionary words from a
//! [`DictionaryStore`]. Translation is deterministic: the same expression and
//! dictionary contents always give the same native query text.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::analysis::has_wildcard;
use crate::dictionary::{DictionaryRef, DictionaryStore, normalize_words};
use crate::error::TranslationError;
use crate::expression::{Condition, Expression, Op, Operator, Term};
use crate::query::native::{BooleanQuery, Bound, NativeQuery, Occur, RangeQuery, RangeValue};
use crate::query::wildcard::{compile_anchored, wildcard_to_regex};
use crate::schema::{FieldMetadata, FieldType, IndexField};

/// Default maximum number of clauses in one boolean node.
pub const DEFAULT_MAX_BOOLEAN_CLAUSE_COUNT: usize = 1024;

const DELIMITER: char = ',';

type TranslateResult<T> = std::result::Result<T, TranslationError>;

/// The output of translation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    /// The native query shared by all shard tasks.
    pub query: NativeQuery,

    /// Words searched for, for hit highlighting.
    pub highlights: BTreeSet<String>,
}

impl fmt::Display for TranslatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query)
    }
}

/// How exact terms are matched against a field's term dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseMode {
    /// Terms keep their case and are matched as given.
    Exact,
    /// Terms were lower-cased at index time; lower-case the query term.
    Folded,
    /// Terms keep their case but this term ignores it.
    IgnoreCase,
}

/// Converts expression trees into native queries.
pub struct QueryTranslator<'a> {
    fields: &'a dyn FieldMetadata,
    dictionaries: &'a dyn DictionaryStore,
    max_boolean_clause_count: usize,
}

impl<'a> QueryTranslator<'a> {
    /// Create a translator over field and dictionary lookups.
    pub fn new(fields: &'a dyn FieldMetadata, dictionaries: &'a dyn DictionaryStore) -> Self {
        Self {
            fields,
            dictionaries,
            max_boolean_clause_count: DEFAULT_MAX_BOOLEAN_CLAUSE_COUNT,
        }
    }

    /// Set the maximum number of clauses in one boolean node.
    pub fn with_max_clause_count(mut self, max: usize) -> Self {
        self.max_boolean_clause_count = max;
        self
    }

    /// Translate an expression.
    pub fn translate(&self, expression: &Expression) -> TranslateResult<TranslatedQuery> {
        if !expression.has_enabled_terms() {
            return Err(TranslationError::EmptyExpression);
        }

        let mut highlights = BTreeSet::new();
        let query = self
            .item(expression, &mut highlights)?
            .ok_or(TranslationError::EmptyExpression)?;

        let count = query.max_clause_count();
        if count > self.max_boolean_clause_count {
            return Err(TranslationError::TooManyClauses {
                count,
                max: self.max_boolean_clause_count,
            });
        }

        debug!(expression = %expression, query = %query, "translated search expression");
        Ok(TranslatedQuery { query, highlights })
    }

    fn item(
        &self,
        expression: &Expression,
        highlights: &mut BTreeSet<String>,
    ) -> TranslateResult<Option<NativeQuery>> {
        if !expression.enabled() {
            return Ok(None);
        }
        match expression {
            Expression::Term(term) => self.term(term, highlights),
            Expression::Operator(operator) => self.operator(operator, highlights),
        }
    }

    fn operator(
        &self,
        operator: &Operator,
        highlights: &mut BTreeSet<String>,
    ) -> TranslateResult<Option<NativeQuery>> {
        let mut children = Vec::with_capacity(operator.children.len());
        for child in &operator.children {
            if let Some(query) = self.item(child, highlights)? {
                children.push(query);
            }
        }
        if children.is_empty() {
            return Ok(None);
        }

        let query = match operator.op {
            Op::And => conjunction(children),
            Op::Or => disjunction(children),
            Op::Not => negation(children),
        };
        Ok(Some(query))
    }

    fn term(&self, term: &Term, highlights: &mut BTreeSet<String>) -> TranslateResult<Option<NativeQuery>> {
        let field_name = term.field.trim();
        if field_name.is_empty() {
            return Err(TranslationError::MissingField);
        }
        let field = self
            .fields
            .field(field_name)
            .ok_or_else(|| TranslationError::UnknownField(field_name.to_string()))?;

        let value = term.value.trim();
        if term.condition == Condition::InDictionary {
            if term.dictionary.is_none() {
                return Err(TranslationError::UnresolvedDictionary(format!(
                    "(not set for field {field_name})"
                )));
            }
        } else if value.is_empty() {
            return Ok(None);
        }

        match field.field_type {
            FieldType::Numeric | FieldType::Date => self.numeric_term(&field, term, value),
            FieldType::Text | FieldType::Keyword => {
                let mode = case_mode(&field, term)?;
                self.text_term(&field, term, value, mode, highlights)
            }
        }
    }

    fn numeric_term(&self, field: &IndexField, term: &Term, value: &str) -> TranslateResult<Option<NativeQuery>> {
        let name = &field.name;
        let query = match term.condition {
            Condition::Equals | Condition::Contains => {
                NativeQuery::Range(RangeQuery::point(name.clone(), parse_number(field, value)?))
            }
            Condition::GreaterThan => NativeQuery::Range(RangeQuery {
                field: name.clone(),
                lower: Bound::Excluded(parse_number(field, value)?),
                upper: Bound::Unbounded,
            }),
            Condition::GreaterThanOrEqualTo => NativeQuery::Range(RangeQuery {
                field: name.clone(),
                lower: Bound::Included(parse_number(field, value)?),
                upper: Bound::Unbounded,
            }),
            Condition::LessThan => NativeQuery::Range(RangeQuery {
                field: name.clone(),
                lower: Bound::Unbounded,
                upper: Bound::Excluded(parse_number(field, value)?),
            }),
            Condition::LessThanOrEqualTo => NativeQuery::Range(RangeQuery {
                field: name.clone(),
                lower: Bound::Unbounded,
                upper: Bound::Included(parse_number(field, value)?),
            }),
            Condition::Between => {
                let (from, to) = parse_between(field, value)?;
                NativeQuery::Range(RangeQuery::inclusive(name.clone(), from, to))
            }
            Condition::In => match numeric_in(field, value)? {
                Some(query) => query,
                None => return Ok(None),
            },
            Condition::InDictionary => {
                let words = self.dictionary_words(term)?;
                let mut queries = Vec::with_capacity(words.len());
                for word in &words {
                    if let Some(query) = numeric_in(field, word)? {
                        queries.push(query);
                    }
                }
                return dictionary_union(term, queries).map(Some);
            }
            Condition::Matches => return Err(unsupported(field, term.condition)),
        };
        Ok(Some(query))
    }

    fn text_term(
        &self,
        field: &IndexField,
        term: &Term,
        value: &str,
        mode: CaseMode,
        highlights: &mut BTreeSet<String>,
    ) -> TranslateResult<Option<NativeQuery>> {
        match term.condition {
            Condition::Equals | Condition::Contains => Ok(analyzed(field, value, mode, Occur::Must, highlights)),
            Condition::In => {
                if field.is_keyword() {
                    let parts: Vec<NativeQuery> = value
                        .split(|c: char| c == DELIMITER || c.is_whitespace())
                        .filter(|part| !part.is_empty())
                        .map(|part| {
                            highlights.insert(part.to_string());
                            exact(&field.name, part, mode)
                        })
                        .collect();
                    Ok(combine(parts, Occur::Should))
                } else {
                    Ok(analyzed(field, value, mode, Occur::Should, highlights))
                }
            }
            Condition::Between => {
                let parts: Vec<&str> = value.split(DELIMITER).map(str::trim).collect();
                if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                    return Err(TranslationError::invalid_value(
                        &field.name,
                        "2 values needed for between query",
                    ));
                }
                let (from, to) = match mode {
                    CaseMode::Folded => (parts[0].to_lowercase(), parts[1].to_lowercase()),
                    _ => (parts[0].to_string(), parts[1].to_string()),
                };
                if from >= to {
                    return Err(TranslationError::invalid_value(
                        &field.name,
                        "from value must be lower than to value",
                    ));
                }
                Ok(Some(NativeQuery::Range(RangeQuery::inclusive(
                    field.name.clone(),
                    RangeValue::Text(from),
                    RangeValue::Text(to),
                ))))
            }
            Condition::Matches => {
                let case_insensitive = mode != CaseMode::Exact;
                compile_anchored(value, case_insensitive)
                    .map_err(|e| TranslationError::invalid_value(&field.name, e.to_string()))?;
                Ok(Some(NativeQuery::Regex {
                    field: field.name.clone(),
                    pattern: value.to_string(),
                    case_insensitive,
                }))
            }
            Condition::InDictionary => {
                let words = self.dictionary_words(term)?;
                let mut queries = Vec::with_capacity(words.len());
                for word in &words {
                    // All words on one dictionary line must occur.
                    if let Some(query) = analyzed(field, word, mode, Occur::Must, highlights) {
                        queries.push(query);
                    }
                }
                dictionary_union(term, queries).map(Some)
            }
            Condition::GreaterThan
            | Condition::GreaterThanOrEqualTo
            | Condition::LessThan
            | Condition::LessThanOrEqualTo => Err(unsupported(field, term.condition)),
        }
    }

    fn dictionary_words(&self, term: &Term) -> TranslateResult<Vec<String>> {
        let dictionary: &DictionaryRef = term
            .dictionary
            .as_ref()
            .ok_or_else(|| TranslationError::UnresolvedDictionary(format!("(not set for field {})", term.field)))?;

        let text = self
            .dictionaries
            .resolve_combined(dictionary)
            .map_err(|e| TranslationError::UnresolvedDictionary(format!("{dictionary}: {e}")))?
            .ok_or_else(|| TranslationError::UnresolvedDictionary(dictionary.to_string()))?;

        Ok(normalize_words(&text))
    }
}

/// Translate an expression with the default clause limit.
pub fn translate(
    expression: &Expression,
    fields: &dyn FieldMetadata,
    dictionaries: &dyn DictionaryStore,
) -> TranslateResult<NativeQuery> {
    QueryTranslator::new(fields, dictionaries)
        .translate(expression)
        .map(|translated| translated.query)
}

fn case_mode(field: &IndexField, term: &Term) -> TranslateResult<CaseMode> {
    match (field.case_sensitive, term.case_sensitive) {
        (true, None) | (true, Some(true)) => Ok(CaseMode::Exact),
        (true, Some(false)) => Ok(CaseMode::IgnoreCase),
        (false, None) | (false, Some(false)) => Ok(CaseMode::Folded),
        (false, Some(true)) => Err(TranslationError::UnsupportedCondition {
            field: field.name.clone(),
            field_type: format!("case-insensitive {}", field.field_type),
            condition: format!("case-sensitive {}", term.condition),
        }),
    }
}

fn unsupported(field: &IndexField, condition: Condition) -> TranslationError {
    TranslationError::UnsupportedCondition {
        field: field.name.clone(),
        field_type: field.field_type.to_string(),
        condition: condition.to_string(),
    }
}

/// Build the query for a single term value.
fn exact(field: &str, token: &str, mode: CaseMode) -> NativeQuery {
    let token = match mode {
        CaseMode::Folded => token.to_lowercase(),
        CaseMode::Exact | CaseMode::IgnoreCase => token.to_string(),
    };

    match (mode, has_wildcard(&token)) {
        (CaseMode::IgnoreCase, wildcard) => {
            let pattern = if wildcard {
                let anchored = wildcard_to_regex(&token);
                anchored[1..anchored.len() - 1].to_string()
            } else {
                regex::escape(&token)
            };
            NativeQuery::Regex {
                field: field.to_string(),
                pattern,
                case_insensitive: true,
            }
        }
        (_, true) => NativeQuery::wildcard(field, token),
        (_, false) => NativeQuery::term(field, token),
    }
}

/// Analyze a value with the field's analyzer and combine the terms.
fn analyzed(
    field: &IndexField,
    value: &str,
    mode: CaseMode,
    occur: Occur,
    highlights: &mut BTreeSet<String>,
) -> Option<NativeQuery> {
    if field.is_keyword() {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        highlights.insert(value.to_string());
        return Some(exact(&field.name, value, mode));
    }

    let tokens = field.analyzer.analyze_query(value, mode != CaseMode::Folded);
    let queries: Vec<NativeQuery> = tokens
        .iter()
        .map(|token| {
            highlights.insert(token.clone());
            exact(&field.name, token, mode)
        })
        .collect();
    combine(queries, occur)
}

fn combine(queries: Vec<NativeQuery>, occur: Occur) -> Option<NativeQuery> {
    match queries.len() {
        0 => None,
        1 => queries.into_iter().next(),
        _ => {
            let mut boolean = BooleanQuery::new();
            for query in queries {
                boolean.add(query, occur);
            }
            Some(NativeQuery::Boolean(boolean))
        }
    }
}

fn dictionary_union(term: &Term, queries: Vec<NativeQuery>) -> TranslateResult<NativeQuery> {
    combine(queries, Occur::Should).ok_or_else(|| {
        let name = term
            .dictionary
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        TranslationError::UnresolvedDictionary(format!("{name} contains no usable words"))
    })
}

/// AND: MUST clauses, lifting nested conjunctions and negations.
fn conjunction(children: Vec<NativeQuery>) -> NativeQuery {
    if children.len() == 1 {
        return children.into_iter().next().unwrap_or(NativeQuery::MatchAll);
    }

    let mut boolean = BooleanQuery::new();
    for child in children {
        match child {
            NativeQuery::Boolean(inner) if !inner.has_occur(Occur::Should) => {
                for clause in inner.into_clauses() {
                    boolean.add(clause.query, clause.occur);
                }
            }
            other => boolean.add_must(other),
        }
    }
    simplify(boolean)
}

/// OR: SHOULD clauses, lifting nested disjunctions.
fn disjunction(children: Vec<NativeQuery>) -> NativeQuery {
    if children.len() == 1 {
        return children.into_iter().next().unwrap_or(NativeQuery::MatchAll);
    }

    let mut boolean = BooleanQuery::new();
    for child in children {
        match child {
            NativeQuery::Boolean(inner) if inner.clauses().iter().all(|c| c.occur == Occur::Should) => {
                for clause in inner.into_clauses() {
                    boolean.add_should(clause.query);
                }
            }
            other => boolean.add_should(other),
        }
    }
    NativeQuery::Boolean(boolean)
}

/// NOT: a match-all MUST clause plus one MUST_NOT clause per child.
///
/// A child that is itself a single negation is unwrapped into a MUST clause.
fn negation(children: Vec<NativeQuery>) -> NativeQuery {
    let mut boolean = BooleanQuery::new();
    boolean.add_must(NativeQuery::MatchAll);
    for child in children {
        match single_negation(child) {
            Ok(negated) => boolean.add_must(negated),
            Err(child) => boolean.add_must_not(child),
        }
    }
    simplify(boolean)
}

/// If `query` is `+*:* -x`, return `x`.
fn single_negation(query: NativeQuery) -> std::result::Result<NativeQuery, NativeQuery> {
    let is_single = match &query {
        NativeQuery::Boolean(boolean) => {
            let clauses = boolean.clauses();
            clauses.len() == 2
                && clauses[0].occur == Occur::Must
                && clauses[0].query == NativeQuery::MatchAll
                && clauses[1].occur == Occur::MustNot
        }
        _ => false,
    };

    match query {
        NativeQuery::Boolean(boolean) if is_single => {
            let mut clauses = boolean.into_clauses();
            Ok(clauses.swap_remove(1).query)
        }
        other => Err(other),
    }
}

/// Drop redundant match-all clauses and collapse a lone MUST clause.
fn simplify(boolean: BooleanQuery) -> NativeQuery {
    let clauses = boolean.into_clauses();
    let has_positive = clauses
        .iter()
        .any(|c| c.occur == Occur::Must && c.query != NativeQuery::MatchAll);

    let mut result = BooleanQuery::new();
    let mut seen_match_all = false;
    for clause in clauses {
        if clause.occur == Occur::Must && clause.query == NativeQuery::MatchAll {
            if has_positive || seen_match_all {
                continue;
            }
            seen_match_all = true;
        }
        result.add(clause.query, clause.occur);
    }

    if result.len() == 1 && result.clauses()[0].occur == Occur::Must {
        return result.into_clauses().swap_remove(0).query;
    }
    NativeQuery::Boolean(result)
}

fn parse_number(field: &IndexField, value: &str) -> TranslateResult<RangeValue> {
    let value = value.trim();
    if field.field_type == FieldType::Date {
        return parse_date(value)
            .map(RangeValue::Long)
            .ok_or_else(|| {
                TranslationError::invalid_value(
                    &field.name,
                    format!("expected a date but was given \"{value}\""),
                )
            });
    }

    if let Ok(n) = value.parse::<i64>() {
        return Ok(RangeValue::Long(n));
    }
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(RangeValue::Double(n)),
        _ => Err(TranslationError::invalid_value(
            &field.name,
            format!("expected a numeric value but was given \"{value}\""),
        )),
    }
}

fn parse_numbers(field: &IndexField, value: &str) -> TranslateResult<Vec<RangeValue>> {
    let values: Vec<RangeValue> = value
        .split(DELIMITER)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_number(field, v))
        .collect::<TranslateResult<_>>()?;

    // Mixed integer and decimal literals compare as doubles.
    if values.iter().any(|v| matches!(v, RangeValue::Double(_))) {
        return Ok(values.into_iter().map(|v| RangeValue::Double(as_f64(&v))).collect());
    }
    Ok(values)
}

fn parse_between(field: &IndexField, value: &str) -> TranslateResult<(RangeValue, RangeValue)> {
    let [from, to]: [RangeValue; 2] = parse_numbers(field, value)?
        .try_into()
        .map_err(|_| TranslationError::invalid_value(&field.name, "2 values needed for between query"))?;
    if as_f64(&from) >= as_f64(&to) {
        return Err(TranslationError::invalid_value(
            &field.name,
            "from value must be lower than to value",
        ));
    }
    Ok((from, to))
}

fn numeric_in(field: &IndexField, value: &str) -> TranslateResult<Option<NativeQuery>> {
    let points: Vec<NativeQuery> = parse_numbers(field, value)?
        .into_iter()
        .map(|v| NativeQuery::Range(RangeQuery::point(field.name.clone(), v)))
        .collect();
    Ok(combine(points, Occur::Should))
}

fn as_f64(value: &RangeValue) -> f64 {
    match value {
        RangeValue::Long(n) => *n as f64,
        RangeValue::Double(n) => *n,
        RangeValue::Text(_) => f64::NAN,
    }
}

/// Parse a date as epoch milliseconds.
///
/// Accepts epoch milliseconds, RFC 3339 timestamps, timestamps without an
/// offset (taken as UTC) and plain dates (midnight UTC).
pub fn parse_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return Some(millis);
    }
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Some(date_time.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(value, format) {
            return Some(date_time.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalyzerType;
    use crate::dictionary::MemoryDictionaryStore;
    use crate::schema::IndexFields;

    fn fields() -> IndexFields {
        IndexFields::new()
            .with(IndexField::keyword("host"))
            .with(IndexField::keyword("user").case_sensitive(true))
            .with(IndexField::text("message", AnalyzerType::AlphaNumeric))
            .with(IndexField::numeric("bytes"))
            .with(IndexField::date("event_time"))
    }

    fn text(expression: &Expression) -> TranslateResult<String> {
        let fields = fields();
        let dictionaries = MemoryDictionaryStore::new();
        QueryTranslator::new(&fields, &dictionaries)
            .translate(expression)
            .map(|t| t.query.to_string())
    }

    #[test]
    fn test_and_or() {
        let expression = Expression::and(vec![
            Term::equals("host", "Web-01").into(),
            Expression::or(vec![
                Term::equals("bytes", "10").into(),
                Term::equals("bytes", "20").into(),
            ]),
        ]);
        assert_eq!(
            text(&expression).unwrap(),
            "+host:web-01 +(bytes:[10 TO 10] bytes:[20 TO 20])"
        );
    }

    #[test]
    fn test_single_child_collapses() {
        let expression = Expression::and(vec![Term::equals("host", "a").into()]);
        assert_eq!(text(&expression).unwrap(), "host:a");
    }

    #[test]
    fn test_not_pairs_with_match_all() {
        let expression = Expression::not(vec![Term::equals("host", "a").into()]);
        assert_eq!(text(&expression).unwrap(), "+*:* -host:a");

        let expression = Expression::and(vec![
            Term::equals("host", "a").into(),
            Expression::not(vec![Term::equals("host", "b").into()]),
        ]);
        assert_eq!(text(&expression).unwrap(), "+host:a -host:b");
    }

    #[test]
    fn test_double_negation() {
        let expression = Expression::not(vec![Expression::not(vec![Term::equals("host", "a").into()])]);
        assert_eq!(text(&expression).unwrap(), "host:a");
    }

    #[test]
    fn test_numeric_conditions() {
        let cases = [
            (Condition::GreaterThan, "5", "bytes:{5 TO *]"),
            (Condition::GreaterThanOrEqualTo, "5", "bytes:[5 TO *]"),
            (Condition::LessThan, "5", "bytes:[* TO 5}"),
            (Condition::LessThanOrEqualTo, "5.5", "bytes:[* TO 5.5]"),
            (Condition::Between, "1, 10", "bytes:[1 TO 10]"),
            (Condition::In, "1,2", "bytes:[1 TO 1] bytes:[2 TO 2]"),
        ];
        for (condition, value, expected) in cases {
            let expression: Expression = Term::new("bytes", condition, value).into();
            assert_eq!(text(&expression).unwrap(), expected);
        }
    }

    #[test]
    fn test_between_validation() {
        let expression: Expression = Term::between("bytes", "10", "1").into();
        assert!(matches!(text(&expression), Err(TranslationError::InvalidValue { .. })));

        let expression: Expression = Term::new("bytes", Condition::Between, "1").into();
        assert!(matches!(text(&expression), Err(TranslationError::InvalidValue { .. })));

        let expression: Expression = Term::equals("bytes", "lots").into();
        assert!(matches!(text(&expression), Err(TranslationError::InvalidValue { .. })));
    }

    #[test]
    fn test_date_between() {
        let expression: Expression =
            Term::between("event_time", "2024-01-01T00:00:00.000Z", "2024-01-02").into();
        assert_eq!(
            text(&expression).unwrap(),
            "event_time:[1704067200000 TO 1704153600000]"
        );
    }

    #[test]
    fn test_text_between_is_lexicographic() {
        let expression: Expression = Term::between("host", "A", "m").into();
        assert_eq!(text(&expression).unwrap(), "host:[a TO m]");
    }

    #[test]
    fn test_contains_analyzed() {
        let expression: Expression = Term::contains("message", "Disk FULL").into();
        assert_eq!(text(&expression).unwrap(), "+message:disk +message:full");

        let expression: Expression = Term::in_values("message", "disk full").into();
        assert_eq!(text(&expression).unwrap(), "message:disk message:full");
    }

    #[test]
    fn test_wildcards() {
        let expression: Expression = Term::equals("host", "WEB-*").into();
        assert_eq!(text(&expression).unwrap(), "host:web-*");

        let expression: Expression = Term::equals("user", "j?").with_case_sensitive(false).into();
        assert_eq!(text(&expression).unwrap(), "user:/j./i");
    }

    #[test]
    fn test_case_policies() {
        let expression: Expression = Term::equals("user", "JBloggs").into();
        assert_eq!(text(&expression).unwrap(), "user:JBloggs");

        let expression: Expression = Term::equals("user", "JBloggs").with_case_sensitive(false).into();
        assert_eq!(text(&expression).unwrap(), "user:/JBloggs/i");

        let expression: Expression = Term::equals("host", "Web").with_case_sensitive(true).into();
        assert!(matches!(
            text(&expression),
            Err(TranslationError::UnsupportedCondition { .. })
        ));
    }

    #[test]
    fn test_regex_term() {
        let expression: Expression = Term::matches("host", "web-[0-9]+").into();
        assert_eq!(text(&expression).unwrap(), "host:/web-[0-9]+/i");

        let expression: Expression = Term::matches("host", "web-[").into();
        assert!(matches!(text(&expression), Err(TranslationError::InvalidValue { .. })));
    }

    #[test]
    fn test_errors() {
        let expression: Expression = Term::equals("nope", "a").into();
        assert_eq!(
            text(&expression),
            Err(TranslationError::UnknownField("nope".to_string()))
        );

        let expression: Expression = Term::new("host", Condition::GreaterThan, "a").into();
        assert!(matches!(
            text(&expression),
            Err(TranslationError::UnsupportedCondition { .. })
        ));

        let expression: Expression =
            Term::in_dictionary("host", DictionaryRef::new("missing")).into();
        assert!(matches!(
            text(&expression),
            Err(TranslationError::UnresolvedDictionary(_))
        ));

        let expression = Expression::and(vec![]);
        assert_eq!(text(&expression), Err(TranslationError::EmptyExpression));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let expression = Expression::and(vec![
            Term::equals("host", "  ").into(),
            Term::equals("host", "a").into(),
            Term::equals("bytes", "1").disabled().into(),
        ]);
        assert_eq!(text(&expression).unwrap(), "host:a");
    }

    #[test]
    fn test_too_many_clauses() {
        let fields = fields();
        let dictionaries = MemoryDictionaryStore::new();
        let expression: Expression = Term::in_values("bytes", "1,2,3").into();
        let result = QueryTranslator::new(&fields, &dictionaries)
            .with_max_clause_count(2)
            .translate(&expression);
        assert_eq!(result, Err(TranslationError::TooManyClauses { count: 3, max: 2 }));
    }

    #[test]
    fn test_highlights() {
        let fields = fields();
        let dictionaries = MemoryDictionaryStore::new();
        let expression: Expression = Term::contains("message", "Disk full").into();
        let translated = QueryTranslator::new(&fields, &dictionaries)
            .translate(&expression)
            .unwrap();
        let highlights: Vec<&str> = translated.highlights.iter().map(String::as_str).collect();
        assert_eq!(highlights, vec!["disk", "full"]);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("1704067200000"), Some(1_704_067_200_000));
        assert_eq!(parse_date("2024-01-01T00:00:00Z"), Some(1_704_067_200_000));
        assert_eq!(parse_date("2024-01-01T00:00:00.500"), Some(1_704_067_200_500));
        assert_eq!(parse_date("2024-01-01"), Some(1_704_067_200_000));
        assert_eq!(parse_date("yesterday"), None);
    }
}
