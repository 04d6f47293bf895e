//! The native query model executed by shard searchers.
//!
//! A [`NativeQuery`] is built once per search and shared read-only by every
//! shard task. Its `Display` output is the canonical textual form: the same
//! query always renders to the same text, which is what translation
//! regression tests compare.

use std::fmt;

/// Occurrence requirements for boolean clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occur {
    /// The clause must match (equivalent to AND).
    Must,
    /// The clause should match (equivalent to OR).
    Should,
    /// The clause must not match (equivalent to NOT).
    MustNot,
}

impl Occur {
    fn prefix(&self) -> &'static str {
        match self {
            Occur::Must => "+",
            Occur::Should => "",
            Occur::MustNot => "-",
        }
    }
}

/// A clause in a boolean query.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanClause {
    /// The occurrence requirement.
    pub occur: Occur,
    /// The query for this clause.
    pub query: NativeQuery,
}

impl BooleanClause {
    /// Create a new boolean clause.
    pub fn new(query: NativeQuery, occur: Occur) -> Self {
        BooleanClause { occur, query }
    }
}

/// A boolean combination of clauses.
///
/// Matching follows the usual rules: every MUST clause has to match, no
/// MUST_NOT clause may match, and when there are no MUST clauses at least one
/// SHOULD clause has to match. A query made only of MUST_NOT clauses matches
/// nothing, which is why negations are paired with [`NativeQuery::MatchAll`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BooleanQuery {
    clauses: Vec<BooleanClause>,
}

impl BooleanQuery {
    /// Create a new empty boolean query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause.
    pub fn add(&mut self, query: NativeQuery, occur: Occur) {
        self.clauses.push(BooleanClause::new(query, occur));
    }

    /// Add a MUST clause.
    pub fn add_must(&mut self, query: NativeQuery) {
        self.add(query, Occur::Must);
    }

    /// Add a SHOULD clause.
    pub fn add_should(&mut self, query: NativeQuery) {
        self.add(query, Occur::Should);
    }

    /// Add a MUST_NOT clause.
    pub fn add_must_not(&mut self, query: NativeQuery) {
        self.add(query, Occur::MustNot);
    }

    /// Get the clauses.
    pub fn clauses(&self) -> &[BooleanClause] {
        &self.clauses
    }

    /// Take the clauses.
    pub fn into_clauses(self) -> Vec<BooleanClause> {
        self.clauses
    }

    /// Number of clauses.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Check if this query is empty.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether any clause has the given occurrence.
    pub fn has_occur(&self, occur: Occur) -> bool {
        self.clauses.iter().any(|c| c.occur == occur)
    }
}

/// A value bounding a range query.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeValue {
    /// Integer bound (also used for dates as epoch milliseconds).
    Long(i64),
    /// Floating point bound.
    Double(f64),
    /// Lexicographic bound.
    Text(String),
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Long(v) => write!(f, "{v}"),
            RangeValue::Double(v) => write!(f, "{v:?}"),
            RangeValue::Text(v) => write_escaped(f, v),
        }
    }
}

/// Bound type for range queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound<T> {
    /// Inclusive bound.
    Included(T),
    /// Exclusive bound.
    Excluded(T),
    /// Unbounded (no limit).
    Unbounded,
}

/// A query matching field values within a range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// The field to search in.
    pub field: String,
    /// Lower bound of the range.
    pub lower: Bound<RangeValue>,
    /// Upper bound of the range.
    pub upper: Bound<RangeValue>,
}

impl RangeQuery {
    /// Create a range with both bounds inclusive.
    pub fn inclusive<S: Into<String>>(field: S, lower: RangeValue, upper: RangeValue) -> Self {
        Self {
            field: field.into(),
            lower: Bound::Included(lower),
            upper: Bound::Included(upper),
        }
    }

    /// Create a range matching exactly one value.
    pub fn point<S: Into<String>>(field: S, value: RangeValue) -> Self {
        Self::inclusive(field, value.clone(), value)
    }
}

impl fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.field)?;
        match &self.lower {
            Bound::Included(v) => write!(f, "[{v}")?,
            Bound::Excluded(v) => write!(f, "{{{v}")?,
            Bound::Unbounded => f.write_str("[*")?,
        }
        f.write_str(" TO ")?;
        match &self.upper {
            Bound::Included(v) => write!(f, "{v}]"),
            Bound::Excluded(v) => write!(f, "{v}}}"),
            Bound::Unbounded => f.write_str("*]"),
        }
    }
}

/// A compiled, engine-level query.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    /// Matches every document.
    MatchAll,
    /// Matches documents containing the exact term.
    Term { field: String, text: String },
    /// Matches terms against a `*`/`?` pattern.
    Wildcard { field: String, pattern: String },
    /// Matches terms against an anchored regular expression.
    Regex {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    /// Matches values within a range.
    Range(RangeQuery),
    /// Boolean combination.
    Boolean(BooleanQuery),
}

impl NativeQuery {
    /// Create a term query.
    pub fn term<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        NativeQuery::Term {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Create a wildcard query.
    pub fn wildcard<F: Into<String>, P: Into<String>>(field: F, pattern: P) -> Self {
        NativeQuery::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Whether this is a boolean query.
    pub fn is_boolean(&self) -> bool {
        matches!(self, NativeQuery::Boolean(_))
    }

    /// Largest clause count of any boolean node in the tree.
    pub fn max_clause_count(&self) -> usize {
        match self {
            NativeQuery::Boolean(boolean) => boolean
                .clauses()
                .iter()
                .map(|c| c.query.max_clause_count())
                .fold(boolean.len(), usize::max),
            _ => 0,
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeQuery::MatchAll => f.write_str("*:*"),
            NativeQuery::Term { field, text } => {
                write!(f, "{field}:")?;
                write_escaped(f, text)
            }
            NativeQuery::Wildcard { field, pattern } => write!(f, "{field}:{pattern}"),
            NativeQuery::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                write!(f, "{field}:/{pattern}/")?;
                if *case_insensitive {
                    f.write_str("i")?;
                }
                Ok(())
            }
            NativeQuery::Range(range) => write!(f, "{range}"),
            NativeQuery::Boolean(boolean) => {
                for (i, clause) in boolean.clauses().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str(clause.occur.prefix())?;
                    if clause.query.is_boolean() {
                        write!(f, "({})", clause.query)?;
                    } else {
                        write!(f, "{}", clause.query)?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '"' | '(' | ')' | '[' | ']' | '{' | '}'));
    if !needs_quotes {
        return f.write_str(text);
    }

    f.write_str("\"")?;
    for c in text.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_and_match_all_display() {
        assert_eq!(NativeQuery::MatchAll.to_string(), "*:*");
        assert_eq!(NativeQuery::term("host", "web-01").to_string(), "host:web-01");
        assert_eq!(
            NativeQuery::term("msg", "two words").to_string(),
            "msg:\"two words\""
        );
    }

    #[test]
    fn test_range_display() {
        let range = RangeQuery::inclusive("bytes", RangeValue::Long(1), RangeValue::Long(5));
        assert_eq!(range.to_string(), "bytes:[1 TO 5]");

        let range = RangeQuery {
            field: "load".to_string(),
            lower: Bound::Excluded(RangeValue::Double(0.5)),
            upper: Bound::Unbounded,
        };
        assert_eq!(range.to_string(), "load:{0.5 TO *]");
    }

    #[test]
    fn test_boolean_display() {
        let mut inner = BooleanQuery::new();
        inner.add_should(NativeQuery::term("a", "1"));
        inner.add_should(NativeQuery::term("a", "2"));

        let mut outer = BooleanQuery::new();
        outer.add_must(NativeQuery::MatchAll);
        outer.add_must_not(NativeQuery::term("b", "x"));
        outer.add_must(NativeQuery::Boolean(inner));

        let query = NativeQuery::Boolean(outer);
        assert_eq!(query.to_string(), "+*:* -b:x +(a:1 a:2)");
        assert_eq!(query.max_clause_count(), 3);
    }

    #[test]
    fn test_regex_display() {
        let query = NativeQuery::Regex {
            field: "host".to_string(),
            pattern: "web-\\d+".to_string(),
            case_insensitive: true,
        };
        assert_eq!(query.to_string(), "host:/web-\\d+/i");
    }
}
