//! Tag normalization and extraction
//!
//! OCR output is noisy: stray punctuation, mixed case, and split whitespace
//! are common around `#hashtag` and `@mention` tokens. These helpers reduce
//! both the required tags and the recognized words to comparable forms.

use once_cell::sync::Lazy;
use regex::Regex;

/// `#` or `@` followed by one or more word characters or hyphens
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#@][A-Za-z0-9_\-]+").unwrap());

/// Lowercase, drop whitespace, keep only word characters plus `@`, `#` and `_`
pub fn strict_normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '#'))
        .collect()
}

/// Lowercase and drop every non-alphanumeric character, including `@`, `#` and `_`
pub fn fuzzy_normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Extract every hashtag/mention-like token from raw text.
///
/// Tokens keep their original casing and are deduplicated in first-seen order.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for m in TAG_RE.find_iter(text) {
        let token = m.as_str();
        if !tags.iter().any(|t| t == token) {
            tags.push(token.to_string());
        }
    }
    tags
}

/// Trim the required tags and drop empty entries
pub fn clean_required_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    tags.iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
