//! Native queries and their translation from search expressions.

pub mod native;
pub mod translator;
pub mod wildcard;

pub use self::native::{BooleanClause, BooleanQuery, Bound, NativeQuery, Occur, RangeQuery, RangeValue};
pub use self::translator::{
    DEFAULT_MAX_BOOLEAN_CLAUSE_COUNT, QueryTranslator, TranslatedQuery, parse_date, translate,
};
