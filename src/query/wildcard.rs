//! Wildcard pattern compilation.
//!
//! Supports the following wildcards:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `\*` and `\?` match literal `*` and `?` characters

use regex::{Regex, RegexBuilder};

/// Convert a wildcard pattern into an anchored regular expression.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex_pattern = String::with_capacity(pattern.len() + 8);
    regex_pattern.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => regex_pattern.push_str(&regex::escape(&escaped.to_string())),
                None => regex_pattern.push_str("\\\\"),
            },
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            c => regex_pattern.push_str(&regex::escape(&c.to_string())),
        }
    }

    regex_pattern.push('$');
    regex_pattern
}

/// Compile a wildcard pattern.
pub fn compile_wildcard(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&wildcard_to_regex(pattern))
        .case_insensitive(case_insensitive)
        .build()
}

/// Compile a user regular expression so it must match a whole term.
pub fn compile_anchored(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(case_insensitive)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        let regex = compile_wildcard("web-*", false).unwrap();
        assert!(regex.is_match("web-01"));
        assert!(regex.is_match("web-"));
        assert!(!regex.is_match("db-01"));

        let regex = compile_wildcard("h?st", false).unwrap();
        assert!(regex.is_match("host"));
        assert!(!regex.is_match("hoost"));
    }

    #[test]
    fn test_wildcard_escapes() {
        assert_eq!(wildcard_to_regex("a.b"), "^a\\.b$");
        let regex = compile_wildcard("what\\?", false).unwrap();
        assert!(regex.is_match("what?"));
        assert!(!regex.is_match("whats"));
    }

    #[test]
    fn test_anchored_regex() {
        let regex = compile_anchored("web|db", true).unwrap();
        assert!(regex.is_match("WEB"));
        assert!(!regex.is_match("webserver"));
    }
}
