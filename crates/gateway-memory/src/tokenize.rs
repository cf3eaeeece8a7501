//! Shared query tokenizer for C2's lexical search and C3's keyword rerank.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being",
    "to", "of", "in", "on", "at", "for", "with", "by", "from", "as", "this", "that", "these",
    "those", "it", "its", "you", "your", "i", "we", "they", "them", "he", "she", "his", "her",
    "what", "which", "who", "whom", "will", "would", "can", "could", "not", "no",
];

const MAX_TOKENS: usize = 10;
const MIN_TOKEN_LEN: usize = 3;

/// Lowercases, keeps `[a-z0-9_-]`, drops tokens shorter than 3 chars and
/// stop words, deduplicates, caps at 10 tokens (in first-seen order).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for raw in split_words(&lowered) {
        if raw.len() < MIN_TOKEN_LEN {
            continue;
        }
        if STOP_WORDS.contains(&raw.as_str()) {
            continue;
        }
        if seen.insert(raw.clone()) {
            out.push(raw);
            if out.len() >= MAX_TOKENS {
                break;
            }
        }
    }
    out
}

fn split_words(lowered: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            cur.push(c);
        } else if !cur.is_empty() {
            words.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        words.push(cur);
    }
    words
}

/// Number of `tokens` that appear as a substring of `haystack` (already
/// lowercased).
pub fn count_contained(tokens: &[String], haystack_lower: &str) -> usize {
    tokens.iter().filter(|t| haystack_lower.contains(t.as_str())).count()
}
