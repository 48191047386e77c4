//! Text preprocessing for embedding generation.
//!
//! Reduces raw item or prompt text to an embedding-ready token stream:
//! 1. Strip YAML frontmatter
//! 2. Collapse whitespace runs to a single space
//! 3. Drop stop words and single-character tokens
//! 4. Trim
//!
//! Every stage is pure and never fails; missing structure makes that stage
//! a no-op. Lowercasing is the caller's job (see [`embedding_text`]).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Frontmatter delimiter line
const FRONTMATTER_DELIMITER: &str = "---";

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Lightweight English stop-word list.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "this", "these",
        "those", "or", "but", "can", "have", "do", "does", "did", "doing",
    ]
    .into_iter()
    .collect()
});

/// Normalize text for embedding.
pub fn normalize(text: &str) -> String {
    let text = strip_frontmatter(text);
    let text = normalize_whitespace(text);
    let text = remove_stop_words(&text);
    text.trim().to_string()
}

/// Lowercase then normalize. This is what items and prompts go through
/// before they reach the embedding provider.
pub fn embedding_text(raw: &str) -> String {
    normalize(&raw.to_lowercase())
}

/// Drop a leading `---` ... `---` block.
///
/// Returns the input unchanged when the opening line is not a delimiter or
/// when no closing delimiter exists.
pub fn strip_frontmatter(text: &str) -> &str {
    if !text.starts_with(FRONTMATTER_DELIMITER) {
        return text;
    }

    // Byte offset of the start of the current line
    let mut offset = match text.find('\n') {
        Some(idx) => idx + 1,
        None => return text,
    };

    while offset <= text.len() {
        let rest = &text[offset..];
        let (line, next) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], Some(offset + idx + 1)),
            None => (rest, None),
        };

        if line.trim() == FRONTMATTER_DELIMITER {
            return match next {
                Some(next) => &text[next..],
                None => "",
            };
        }

        match next {
            Some(next) => offset = next,
            None => break,
        }
    }

    text
}

/// Collapse every whitespace run (spaces, tabs, newlines) to one space.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text, " ").into_owned()
}

/// Tokenize on non-alphanumeric runs and drop stop words and one-character
/// tokens. Surviving tokens keep their casing and order.
///
/// Token length is counted in `char`s, not UTF-8 bytes, so a lone
/// multi-byte letter such as "é" is dropped like "a".
pub fn remove_stop_words(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .filter(|word| word.chars().count() > 1)
        .filter(|word| !STOP_WORDS.contains(word.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut text down to at most `max_chars` characters, on a char boundary.
///
/// The result is what gets embedded and therefore what the cache key is
/// computed from.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// SHA256 of the text's UTF-8 bytes, hex encoded (64 chars).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
