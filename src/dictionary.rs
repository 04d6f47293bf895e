//! Dictionaries: named lists of literal values used by membership terms.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reference to a stored dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DictionaryRef {
    /// Unique id of the dictionary.
    pub uuid: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DictionaryRef {
    /// Create a reference from a uuid.
    pub fn new<S: Into<String>>(uuid: S) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
        }
    }

    /// Attach a display name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for DictionaryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "\"{}\" ({})", name, self.uuid),
            None => write!(f, "{}", self.uuid),
        }
    }
}

/// The dictionary collaborator.
pub trait DictionaryStore: Send + Sync {
    /// Resolve a dictionary to its word list. `None` when it does not exist.
    fn resolve(&self, dictionary: &DictionaryRef) -> Result<Option<Vec<String>>>;

    /// Resolve a dictionary, including any dictionaries it imports, to its raw text.
    fn resolve_combined(&self, dictionary: &DictionaryRef) -> Result<Option<String>> {
        Ok(self.resolve(dictionary)?.map(|words| words.join("\n")))
    }
}

/// Split dictionary text into words.
///
/// `\r\n` and `\r` line endings are treated as `\n`, lines are trimmed and
/// blank lines dropped, so the same words always produce the same list.
pub fn normalize_words(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// A dictionary store held in memory.
#[derive(Debug, Default)]
pub struct MemoryDictionaryStore {
    dictionaries: RwLock<HashMap<String, String>>,
    imports: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryDictionaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a dictionary's raw text under a uuid.
    pub fn insert<U: Into<String>, T: Into<String>>(&self, uuid: U, text: T) {
        self.dictionaries.write().insert(uuid.into(), text.into());
    }

    /// Make one dictionary import the words of others.
    pub fn set_imports<U: Into<String>>(&self, uuid: U, imports: Vec<String>) {
        self.imports.write().insert(uuid.into(), imports);
    }

    fn combined(&self, uuid: &str, visited: &mut Vec<String>, out: &mut Vec<String>) -> bool {
        if visited.iter().any(|v| v == uuid) {
            return true;
        }
        visited.push(uuid.to_string());

        let found = match self.dictionaries.read().get(uuid) {
            Some(text) => {
                out.push(text.clone());
                true
            }
            None => false,
        };

        let imports = self.imports.read().get(uuid).cloned().unwrap_or_default();
        let mut any_import = false;
        for import in imports {
            any_import |= self.combined(&import, visited, out);
        }
        found || any_import
    }
}

impl DictionaryStore for MemoryDictionaryStore {
    fn resolve(&self, dictionary: &DictionaryRef) -> Result<Option<Vec<String>>> {
        Ok(self
            .resolve_combined(dictionary)?
            .map(|text| normalize_words(&text)))
    }

    fn resolve_combined(&self, dictionary: &DictionaryRef) -> Result<Option<String>> {
        let mut visited = Vec::new();
        let mut parts = Vec::new();
        if self.combined(&dictionary.uuid, &mut visited, &mut parts) {
            Ok(Some(parts.join("\n")))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_words("1\n2\n3\n4"), vec!["1", "2", "3", "4"]);
        assert_eq!(normalize_words("1\r\n2\r\n3\r\n4\r\n"), vec!["1", "2", "3", "4"]);
        assert_eq!(normalize_words("  a \r b\n\n c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_memory_store_resolve() {
        let store = MemoryDictionaryStore::new();
        store.insert("hosts", "alpha\r\nbeta\r\n");

        let words = store.resolve(&DictionaryRef::new("hosts")).unwrap().unwrap();
        assert_eq!(words, vec!["alpha", "beta"]);
        assert!(store.resolve(&DictionaryRef::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_imports() {
        let store = MemoryDictionaryStore::new();
        store.insert("base", "one\ntwo");
        store.insert("extra", "three");
        store.set_imports("extra", vec!["base".to_string(), "extra".to_string()]);

        let combined = store
            .resolve_combined(&DictionaryRef::new("extra"))
            .unwrap()
            .unwrap();
        assert_eq!(normalize_words(&combined), vec!["three", "one", "two"]);
    }
}
