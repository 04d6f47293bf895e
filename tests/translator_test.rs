//! Integration tests for expression translation, including matching against shards.

use std::sync::Arc;

use shardsearch::prelude::*;
use shardsearch::query::translate;
use shardsearch::shard::memory::{MemoryShard, collect_all, document};

fn fields() -> IndexFields {
    IndexFields::new()
        .with(IndexField::keyword("host"))
        .with(IndexField::numeric("status"))
        .with(IndexField::text("message", AnalyzerType::Standard))
        .with(IndexField::text("raw", AnalyzerType::Whitespace).case_sensitive(true))
}

fn dictionary_term(field: &str, uuid: &str) -> Expression {
    Term::in_dictionary(field, DictionaryRef::new(uuid)).into()
}

#[test]
fn test_dictionary_line_endings_translate_identically() -> Result<()> {
    let fields = fields();
    let dictionaries = MemoryDictionaryStore::new();
    dictionaries.insert("unix", "1\n2\n3\n4");
    dictionaries.insert("windows", "1\r\n2\r\n3\r\n4\r\n");

    for field in ["status", "message"] {
        let unix = translate(&dictionary_term(field, "unix"), &fields, &dictionaries)?;
        let windows = translate(&dictionary_term(field, "windows"), &fields, &dictionaries)?;
        assert_eq!(unix.to_string(), windows.to_string());
        assert!(unix.to_string().contains('4'));
    }

    let numeric = translate(&dictionary_term("status", "unix"), &fields, &dictionaries)?;
    assert!(numeric.to_string().contains("status:[4 TO 4]"));
    Ok(())
}

#[test]
fn test_translation_is_deterministic() -> Result<()> {
    let fields = fields();
    let dictionaries = MemoryDictionaryStore::new();
    let expression = Expression::and(vec![
        Term::contains("message", "disk full").into(),
        Expression::or(vec![
            Term::in_values("status", "500,503").into(),
            Term::equals("host", "web-*").into(),
        ]),
        Expression::not(vec![Term::equals("host", "db-01").into()]),
    ]);

    let first = translate(&expression, &fields, &dictionaries)?.to_string();
    for _ in 0..10 {
        assert_eq!(translate(&expression, &fields, &dictionaries)?.to_string(), first);
    }
    Ok(())
}

#[test]
fn test_contains_honours_field_case_policy() -> Result<()> {
    let fields = fields();
    let dictionaries = MemoryDictionaryStore::new();
    let shard = MemoryShard::build(
        ShardId(1),
        &fields,
        vec![
            document([("message", "new location found"), ("raw", "new location found")]),
            document([("message", "LOCATION unknown"), ("raw", "LOCATION unknown")]),
        ],
    );

    // Case-folding field: both spellings match.
    let query = translate(&Term::contains("message", "LOCATION").into(), &fields, &dictionaries)?;
    assert_eq!(collect_all(&shard, &query)?, vec![0, 1]);

    // Case-sensitive field: only the exact spelling matches.
    let query = translate(&Term::contains("raw", "LOCATION").into(), &fields, &dictionaries)?;
    assert_eq!(collect_all(&shard, &query)?, vec![1]);

    // A term-level override relaxes the case-sensitive field.
    let query = translate(
        &Term::contains("raw", "LOCATION").with_case_sensitive(false).into(),
        &fields,
        &dictionaries,
    )?;
    assert_eq!(collect_all(&shard, &query)?, vec![0, 1]);
    Ok(())
}

#[test]
fn test_not_matches_everything_else() -> Result<()> {
    let fields = fields();
    let dictionaries = MemoryDictionaryStore::new();
    let shard = MemoryShard::build(
        ShardId(1),
        &fields,
        (0..4)
            .map(|i| document([("host", format!("web-{i}"))]))
            .collect(),
    );

    let query = translate(
        &Expression::not(vec![Term::equals("host", "web-2").into()]),
        &fields,
        &dictionaries,
    )?;
    assert_eq!(query.to_string(), "+*:* -host:web-2");
    assert_eq!(collect_all(&shard, &query)?, vec![0, 1, 3]);
    Ok(())
}

#[test]
fn test_numeric_dictionary_matches_listed_values() -> Result<()> {
    let fields = fields();
    let dictionaries = MemoryDictionaryStore::new();
    dictionaries.insert("errors", "500\r\n503\r\n");
    let shard = MemoryShard::build(
        ShardId(1),
        &fields,
        ["200", "500", "404", "503"]
            .into_iter()
            .map(|status| document([("status", status)]))
            .collect(),
    );

    let query = translate(&dictionary_term("status", "errors"), &fields, &dictionaries)?;
    assert_eq!(collect_all(&shard, &query)?, vec![1, 3]);
    Ok(())
}

#[test]
fn test_translator_through_trait_objects() {
    let fields: Arc<dyn FieldMetadata> = Arc::new(fields());
    let dictionaries: Arc<dyn DictionaryStore> = Arc::new(MemoryDictionaryStore::new());
    let translator = QueryTranslator::new(fields.as_ref(), dictionaries.as_ref());

    let error = translator
        .translate(&dictionary_term("host", "missing"))
        .unwrap_err();
    assert!(matches!(error, TranslationError::UnresolvedDictionary(_)));
}
