//! The one canonical tokenizer, shared by dedup, the quality gate, topic
//! extraction, and consolidation. Similarity invariants only hold if every
//! caller tokenizes the same way.

use std::collections::HashSet;

/// Small stop-word set. Tokens here never count toward similarity or topics.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "has", "have",
    "her", "was", "one", "our", "out", "this", "that", "with", "they", "from", "will",
    "would", "there", "their", "what", "which", "when", "where", "who", "how", "than",
    "then", "them", "these", "those", "its", "it's", "into", "onto", "also", "just",
    "should", "could", "been", "being", "were", "does", "did", "doing", "about",
];

/// Lowercase, strip punctuation, drop tokens of two chars or fewer, drop
/// stop-words. Returns tokens in input order (duplicates preserved).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|t| t.trim_matches('_').to_lowercase())
        .filter(|t| t.len() > 2 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Tokenize into a set, for similarity comparisons.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity (intersection over union) of two token sets.
/// Two empty sets are defined as dissimilar, not identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Jaccard over two raw strings, tokenizing both.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&token_set(a), &token_set(b))
}

/// Normalized intent: collapsed whitespace, lowercase. This is the key used
/// for the (kind, intent) uniqueness rule and for import skip-matching.
pub fn normalize_intent(intent: &str) -> String {
    intent
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Truncate at a char boundary, preferring to break at a word.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        // Keep the word break unless it would throw away most of the text
        Some(pos) if pos > max_chars / 2 => cut[..pos].to_string(),
        _ => cut,
    }
}
