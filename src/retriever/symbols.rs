//! Identifier-like tokens pulled out of free-form bug text.
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Two or more capitalised words run together: `TokenValidator`.
static CAMEL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z]+)+)\b").expect("valid regex"));

/// Lowercase words joined by underscores: `validate_token`.
static SNAKE_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z]+(?:_[a-z]+)+)\b").expect("valid regex"));

/// A common verb followed by a capitalised tail: `getUser`, `isExpired`.
static VERB_PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?:get|set|create|update|delete|find|search|load|save|init|handle|process|validate|check|is|has|can|should)[A-Z]\w+)",
    )
    .expect("valid regex")
});

/// A word in backticks or quotes: `` `refresh` ``.
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[`'"](\w+)[`'"]"#).expect("valid regex"));

/// Candidate symbols in order of discovery, deduplicated case-insensitively
/// and capped at `max`.
pub fn extract_symbols(text: &str, max: usize) -> Vec<String> {
    let camel = CAMEL_CASE.captures_iter(text).map(|c| c[1].to_string());
    let snake = SNAKE_CASE.captures_iter(text).map(|c| c[1].to_string());
    let verbs = VERB_PREFIXED.captures_iter(text).map(|c| c[1].to_string());
    let quoted = QUOTED
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .filter(|q| q.chars().count() > 2);

    let mut seen = HashSet::new();
    camel
        .chain(snake)
        .chain(verbs)
        .chain(quoted)
        .filter(|s| seen.insert(s.to_lowercase()))
        .take(max)
        .collect()
}
