//! Structured boolean search expressions.
//!
//! An [`Expression`] is the user-facing form of a query: a tree of AND/OR/NOT
//! operators over field terms. It is immutable once built and is turned into
//! a [`NativeQuery`](crate::query::NativeQuery) by the
//! [`QueryTranslator`](crate::query::QueryTranslator).
//!
//! Expressions serialize to JSON, for example:
//!
//! ```json
//! {"op": "and", "children": [
//!     {"field": "host", "condition": "equals", "value": "web-01"},
//!     {"op": "not", "children": [{"field": "status", "condition": "in", "value": "200,304"}]}
//! ]}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dictionary::DictionaryRef;

/// Boolean operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
    /// No child may match.
    Not,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::And => "AND",
            Op::Or => "OR",
            Op::Not => "NOT",
        };
        f.write_str(name)
    }
}

/// Term conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Exact value.
    Equals,
    /// All words of the value occur in the field.
    Contains,
    /// Strictly greater than.
    GreaterThan,
    /// Greater than or equal to.
    GreaterThanOrEqualTo,
    /// Strictly less than.
    LessThan,
    /// Less than or equal to.
    LessThanOrEqualTo,
    /// Inclusive range given as `from,to`.
    Between,
    /// Any of a comma separated list (numbers) or of the words (text).
    In,
    /// Any of the lines of a dictionary.
    InDictionary,
    /// Regular expression over the field's terms.
    Matches,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Condition::Equals => "=",
            Condition::Contains => "contains",
            Condition::GreaterThan => ">",
            Condition::GreaterThanOrEqualTo => ">=",
            Condition::LessThan => "<",
            Condition::LessThanOrEqualTo => "<=",
            Condition::Between => "between",
            Condition::In => "in",
            Condition::InDictionary => "in dictionary",
            Condition::Matches => "matches",
        };
        f.write_str(name)
    }
}

fn enabled_default() -> bool {
    true
}

/// A field term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Field to match.
    pub field: String,

    /// How the value is matched.
    pub condition: Condition,

    /// The value; unused by dictionary terms.
    #[serde(default)]
    pub value: String,

    /// Dictionary for [`Condition::InDictionary`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<DictionaryRef>,

    /// Override of the field's case policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,

    /// Disabled terms are ignored.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl Term {
    /// Create a term.
    pub fn new<F: Into<String>, V: Into<String>>(field: F, condition: Condition, value: V) -> Self {
        Self {
            field: field.into(),
            condition,
            value: value.into(),
            dictionary: None,
            case_sensitive: None,
            enabled: true,
        }
    }

    /// `field = value`
    pub fn equals<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        Self::new(field, Condition::Equals, value)
    }

    /// `field contains value`
    pub fn contains<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        Self::new(field, Condition::Contains, value)
    }

    /// `field between from and to`
    pub fn between<F: Into<String>>(field: F, from: &str, to: &str) -> Self {
        Self::new(field, Condition::Between, format!("{from},{to}"))
    }

    /// `field in (values)`
    pub fn in_values<F: Into<String>, V: Into<String>>(field: F, values: V) -> Self {
        Self::new(field, Condition::In, values)
    }

    /// `field in dictionary`
    pub fn in_dictionary<F: Into<String>>(field: F, dictionary: DictionaryRef) -> Self {
        let mut term = Self::new(field, Condition::InDictionary, "");
        term.dictionary = Some(dictionary);
        term
    }

    /// `field matches /regex/`
    pub fn matches<F: Into<String>, V: Into<String>>(field: F, regex: V) -> Self {
        Self::new(field, Condition::Matches, regex)
    }

    /// Override the field's case policy for this term.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    /// Disable the term.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.condition, &self.dictionary) {
            (Condition::InDictionary, Some(dictionary)) => {
                write!(f, "{} {} {}", self.field, self.condition, dictionary)
            }
            _ => write!(f, "{} {} {}", self.field, self.condition, self.value),
        }
    }
}

/// A boolean operator over child expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// Operator kind.
    pub op: Op,

    /// Child expressions.
    #[serde(default)]
    pub children: Vec<Expression>,

    /// Disabled operators are ignored along with their children.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl Operator {
    /// Create an operator.
    pub fn new(op: Op, children: Vec<Expression>) -> Self {
        Self {
            op,
            children,
            enabled: true,
        }
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    /// Boolean operator.
    Operator(Operator),
    /// Field term.
    Term(Term),
}

impl Expression {
    /// `AND` of the children.
    pub fn and(children: Vec<Expression>) -> Self {
        Expression::Operator(Operator::new(Op::And, children))
    }

    /// `OR` of the children.
    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Operator(Operator::new(Op::Or, children))
    }

    /// `NOT` of the children.
    pub fn not(children: Vec<Expression>) -> Self {
        Expression::Operator(Operator::new(Op::Not, children))
    }

    /// Whether this node is enabled.
    pub fn enabled(&self) -> bool {
        match self {
            Expression::Operator(operator) => operator.enabled,
            Expression::Term(term) => term.enabled,
        }
    }

    /// Whether the tree contains at least one enabled term under enabled operators.
    pub fn has_enabled_terms(&self) -> bool {
        match self {
            Expression::Term(term) => term.enabled,
            Expression::Operator(operator) => {
                operator.enabled && operator.children.iter().any(Expression::has_enabled_terms)
            }
        }
    }
}

impl From<Term> for Expression {
    fn from(term: Term) -> Self {
        Expression::Term(term)
    }
}

impl From<Operator> for Expression {
    fn from(operator: Operator) -> Self {
        Expression::Operator(operator)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Term(term) => write!(f, "{term}"),
            Expression::Operator(operator) => {
                write!(f, "{} (", operator.op)?;
                for (i, child) in operator.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}
