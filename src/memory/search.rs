//! Hybrid retrieval: keyword, vector, and file-scoped legs merged with
//! weighted reciprocal-rank fusion.
//!
//! This stage is the deterministic merge layer — it applies source weights
//! and filters, and nothing else. Boosting is the ranker's job.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::memory::store::MemoryStore;
use crate::memory::types::{MemoryKind, MemoryUnit};

/// Built-in synonym groups for query expansion. Each member of a group
/// expands to the whole group. The table is authoritative, not illustrative.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["auth", "authentication", "login", "signin"],
    &["db", "database", "sql", "postgres", "mongodb"],
    &["error", "bug", "fix", "issue", "crash"],
    &["api", "endpoint", "route", "rest", "graphql"],
];

/// A fused candidate: merged score plus the legs that produced it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub unit: MemoryUnit,
    pub score: f64,
    pub match_methods: BTreeSet<&'static str>,
}

/// Post-merge filters.
#[derive(Debug, Default, Clone)]
pub struct RetrievalFilter {
    pub kinds: Option<HashSet<MemoryKind>>,
    /// Epoch-ms floor on `timestamp`.
    pub since: Option<i64>,
    pub min_importance: Option<f64>,
    /// Intersect with `related_files` (substring either way).
    pub files: Option<Vec<String>>,
}

impl RetrievalFilter {
    fn admits(&self, unit: &MemoryUnit) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&unit.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if unit.timestamp < since {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if unit.importance < min {
                return false;
            }
        }
        if let Some(files) = &self.files {
            let touches = files.iter().any(|f| {
                unit.related_files
                    .iter()
                    .any(|rf| rf.contains(f.as_str()) || f.contains(rf.as_str()))
            });
            if !touches {
                return false;
            }
        }
        true
    }
}

/// Expand a query against the synonym table into an FTS OR-expression,
/// capped at `cap` terms. Returns `None` when no usable tokens remain.
pub fn expand_query(query: &str, cap: usize) -> Option<String> {
    // Tokens of two chars or fewer are noise, except the abbreviations the
    // synonym table itself knows about ("db").
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| {
            t.len() > 2 || SYNONYM_GROUPS.iter().any(|g| g.contains(&t.as_str()))
        })
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut terms: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for token in &tokens {
        if terms.len() >= cap {
            break;
        }
        if seen.insert(token.clone()) {
            terms.push(token.clone());
        }
        if let Some(group) = SYNONYM_GROUPS.iter().find(|g| g.contains(&token.as_str())) {
            for synonym in *group {
                if terms.len() >= cap {
                    break;
                }
                if seen.insert((*synonym).to_string()) {
                    terms.push((*synonym).to_string());
                }
            }
        }
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Quote a raw query for FTS without synonym expansion (the fallback when
/// the expanded query finds nothing).
fn quote_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|w| w.replace('"', ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Run the three-legged fan-out and fuse the results. `query_vec` is absent
/// when the embedder timed out or has not produced a query vector — the
/// retrieval degrades to FTS (+file) without error.
pub fn retrieve(
    store: &MemoryStore,
    query: &str,
    query_vec: Option<&[f32]>,
    current_file: Option<&str>,
    max_results: usize,
    filter: &RetrievalFilter,
    cfg: &RetrievalConfig,
) -> Result<Vec<Candidate>> {
    let max_results = max_results.clamp(1, cfg.max_results_cap);
    let leg_limit = max_results * 2;

    // Keyword leg, with the unexpanded query as fallback.
    let mut fts_hits = match expand_query(query, cfg.expansion_cap) {
        Some(expanded) => store.search_fts(&expanded, leg_limit)?,
        None => Vec::new(),
    };
    if fts_hits.is_empty() {
        if let Some(quoted) = quote_query(query) {
            fts_hits = store.search_fts(&quoted, leg_limit)?;
        }
    }

    // Vector leg.
    let vec_hits = match query_vec {
        Some(v) => store.search_vector(v, leg_limit)?,
        None => Vec::new(),
    };

    // File-scoped recency leg.
    let file_hits = match current_file {
        Some(path) => store.get_by_file(path, leg_limit)?,
        None => Vec::new(),
    };

    // Weighted reciprocal-rank fusion. Duplicate ids add their weighted
    // scores and union their match-method labels. Ranks are dense: items
    // with equal leg scores share a position, so a bm25 tie stays a tie.
    let mut fused: HashMap<String, Candidate> = HashMap::new();
    absorb(fts_hits, cfg.fts_weight, "fts", &mut fused);
    absorb(vec_hits, cfg.vector_weight, "vector", &mut fused);
    let file_scored: Vec<(MemoryUnit, f64)> = file_hits
        .into_iter()
        .enumerate()
        .map(|(i, u)| (u, -(i as f64)))
        .collect();
    absorb(file_scored, cfg.file_weight, "file", &mut fused);

    let mut candidates: Vec<Candidate> = fused
        .into_values()
        .filter(|c| filter.admits(&c.unit))
        .collect();

    sort_candidates(&mut candidates);
    candidates.truncate(max_results);
    Ok(candidates)
}

/// Fold one scored leg into the fusion map with dense ranking.
fn absorb(
    hits: Vec<(MemoryUnit, f64)>,
    weight: f64,
    method: &'static str,
    fused: &mut HashMap<String, Candidate>,
) {
    let mut position = 0usize;
    let mut previous_score: Option<f64> = None;
    for (unit, leg_score) in hits {
        if let Some(prev) = previous_score {
            if (prev - leg_score).abs() > 1e-9 {
                position += 1;
            }
        }
        previous_score = Some(leg_score);

        let contribution = weight / (position as f64 + 1.0);
        let entry = fused.entry(unit.id.clone()).or_insert_with(|| Candidate {
            unit,
            score: 0.0,
            match_methods: BTreeSet::new(),
        });
        entry.score += contribution;
        entry.match_methods.insert(method);
    }
}

/// Deterministic ordering: score desc, then timestamp desc, then id.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.unit.timestamp.cmp(&a.unit.timestamp))
            .then(a.unit.id.cmp(&b.unit.id))
    });
}
