//! Term-hashing fallback embedder.
//!
//! No model files required: term-frequency-weighted unigram, bigram, and
//! trigram features (with camelCase / snake_case identifier splits) are
//! multi-hashed — DJB2 and FNV-1a — into the fixed dimension count, with a
//! sign bit dispersing collisions, then L2-normalized. Semantically weaker
//! than the sentence transformer, but the contract is identical: unit
//! vectors where cosine similarity is meaningful.

use anyhow::Result;
use std::collections::HashMap;

use super::{l2_normalize, Embedder, EMBEDDING_DIM};

/// Relative emphasis per n-gram order; longer grams are more specific.
const ORDER_WEIGHTS: [f32; 3] = [1.0, 1.5, 2.0];

pub struct HashedEmbedder;

impl HashedEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let words = split_terms(text);
        let mut features: HashMap<String, f32> = HashMap::new();

        for n in 1..=3usize {
            if words.len() < n {
                break;
            }
            let order_weight = ORDER_WEIGHTS[n - 1];
            for gram in words.windows(n) {
                let feature = gram.join(" ");
                *features.entry(feature).or_insert(0.0) += order_weight;
            }
        }

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for (feature, tf) in features {
            // Sub-linear term frequency, the usual tf-idf damping
            let weight = (1.0 + tf.ln()).max(0.1);
            let d1 = (djb2(&feature) as usize) % EMBEDDING_DIM;
            let h2 = fnv1a(&feature);
            let d2 = (h2 as usize) % EMBEDDING_DIM;
            let sign = if (h2 >> 1) & 1 == 0 { 1.0 } else { -1.0 };
            vector[d1] += weight * sign;
            vector[d2] += weight * sign * 0.5;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn name(&self) -> &'static str {
        "hashed"
    }
}

/// Split into lowercase terms, breaking camelCase and snake_case identifiers
/// into their parts (the whole identifier is kept as a term too).
fn split_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if raw.is_empty() {
            continue;
        }
        let lower = raw.to_lowercase();
        let parts = identifier_parts(raw);
        if parts.len() > 1 {
            terms.push(lower);
            terms.extend(parts);
        } else {
            terms.push(lower);
        }
    }
    terms
}

/// "getUserById" → ["get", "user", "by", "id"]; "retry_count" → ["retry", "count"].
fn identifier_parts(word: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in word.chars() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
        prev_lower = c.is_lowercase() || c.is_numeric();
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn djb2(s: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::cosine;

    #[test]
    fn vectors_are_unit_length_and_right_sized() {
        let embedder = HashedEmbedder::new();
        let v = embedder.embed("debounce the search input handler").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn same_text_is_deterministic() {
        let embedder = HashedEmbedder::new();
        let a = embedder.embed("retry the webhook with backoff").unwrap();
        let b = embedder.embed("retry the webhook with backoff").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn overlapping_texts_are_closer_than_disjoint_ones() {
        let embedder = HashedEmbedder::new();
        let a = embedder.embed("retry the stripe webhook with backoff").unwrap();
        let b = embedder.embed("retry the stripe webhook with jitter").unwrap();
        let c = embedder.embed("render the settings modal footer").unwrap();

        let close = cosine(&a, &b);
        let far = cosine(&a, &c);
        assert!(close > far, "close={close} far={far}");
        assert!(close > 0.3);
    }

    #[test]
    fn identifier_splits_contribute_shared_features() {
        let embedder = HashedEmbedder::new();
        let camel = embedder.embed("getUserById fails on guests").unwrap();
        let snake = embedder.embed("get_user_by_id fails on guests").unwrap();
        assert!(cosine(&camel, &snake) > 0.5);
    }

    #[test]
    fn identifier_parts_handles_both_conventions() {
        assert_eq!(identifier_parts("getUserById"), vec!["get", "user", "by", "id"]);
        assert_eq!(identifier_parts("retry_count"), vec!["retry", "count"]);
        assert_eq!(identifier_parts("plain"), vec!["plain"]);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashedEmbedder::new();
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
