//! Contradiction detection, run on every successful store.
//!
//! A contradiction is defined narrowly: two active items of the same kind
//! whose intents overlap heavily and carry mutually exclusive polarity —
//! one asserts a term the other forbids ("use X" vs "never X" / "avoid X").
//! The older item is superseded by the newer one and the pair is linked with
//! a SUPERSEDED_BY edge.
//!
//! The same polarity analysis guards the dedup rule: "always use const,
//! never var" and "always use var, never const" share an identical token set
//! but are opposites, so dedup must not merge them.

use std::collections::HashSet;

use anyhow::Result;

use crate::memory::store::{now_ms, MemoryStore};
use crate::memory::text;
use crate::memory::types::{Edge, EdgeRelation, MemoryUnit};

/// Words that assert a practice.
const POSITIVE_MARKERS: &[&str] = &["use", "always", "prefer", "do"];

/// Words that forbid the terms following them.
const NEGATIVE_MARKERS: &[&str] = &["never", "avoid", "dont", "stop", "not", "no"];

/// How many tokens after a negative marker fall under its scope.
const NEGATION_SCOPE: usize = 2;

/// Outcome of a contradiction sweep for one newly stored item.
#[derive(Debug)]
pub struct ContradictionNote {
    pub superseded_id: String,
    pub superseded_intent: String,
}

/// Compare the new item against its active same-kind peers; supersede any
/// peer whose intent contradicts it. Returns notes for the store response.
///
/// The Jaccard threshold comes from config and may be overridden at runtime
/// through `adaptive_config`.
pub fn resolve(
    store: &mut MemoryStore,
    new_unit: &MemoryUnit,
    threshold: f64,
) -> Result<Vec<ContradictionNote>> {
    let peers = store.get_by_kind(new_unit.kind, 500)?;

    let mut notes = Vec::new();
    for peer in peers {
        if peer.id == new_unit.id || !peer.is_active {
            continue;
        }
        if !conflicts(&new_unit.intent, &peer.intent, threshold) {
            continue;
        }
        // The newer statement wins; an older incoming timestamp never
        // overrides an established peer.
        if peer.timestamp > new_unit.timestamp {
            continue;
        }

        store.deactivate(&peer.id, Some(&new_unit.id))?;
        store.add_edge(&Edge {
            source_id: peer.id.clone(),
            target_id: new_unit.id.clone(),
            relation: EdgeRelation::SupersededBy,
            weight: 1.0,
            timestamp: now_ms(),
        })?;
        store.log_feedback(
            "contradiction",
            Some(&peer.id),
            Some(&serde_json::json!({ "superseded_by": new_unit.id })),
        )?;

        notes.push(ContradictionNote {
            superseded_id: peer.id.clone(),
            superseded_intent: peer.intent.clone(),
        });
    }

    Ok(notes)
}

/// True when two intents of the same kind negate each other: heavy token
/// overlap plus a term one side asserts and the other forbids.
pub fn conflicts(a: &str, b: &str, threshold: f64) -> bool {
    if text::text_similarity(a, b) < threshold {
        return false;
    }

    let negated_a = negated_terms(a);
    let negated_b = negated_terms(b);
    if negated_a == negated_b {
        // Same (or no) forbidden terms — parallel statements, not opposites.
        return false;
    }

    let asserted_a: HashSet<String> = text::token_set(a)
        .difference(&negated_a)
        .cloned()
        .collect();
    let asserted_b: HashSet<String> = text::token_set(b)
        .difference(&negated_b)
        .cloned()
        .collect();

    negated_a.iter().any(|t| asserted_b.contains(t))
        || negated_b.iter().any(|t| asserted_a.contains(t))
}

/// Terms falling inside a negation scope: up to [`NEGATION_SCOPE`] tokens
/// after each negative marker, marker words themselves excluded.
pub fn negated_terms(intent: &str) -> HashSet<String> {
    let words: Vec<String> = intent
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();

    let mut negated = HashSet::new();
    for (i, word) in words.iter().enumerate() {
        if !NEGATIVE_MARKERS.contains(&word.as_str()) {
            continue;
        }
        let mut taken = 0;
        for next in words.iter().skip(i + 1) {
            if taken >= NEGATION_SCOPE {
                break;
            }
            if NEGATIVE_MARKERS.contains(&next.as_str()) {
                break;
            }
            if POSITIVE_MARKERS.contains(&next.as_str()) || next.len() <= 2 {
                taken += 1;
                continue;
            }
            negated.insert(next.clone());
            taken += 1;
        }
    }
    negated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryKind, NewMemory};

    #[test]
    fn negated_terms_scope_follows_markers() {
        let negated = negated_terms("Always use const, never var");
        assert_eq!(negated, HashSet::from(["var".to_string()]));

        let negated = negated_terms("never use joi for validation");
        assert!(negated.contains("joi"));
        assert!(!negated.contains("validation"));
    }

    #[test]
    fn mirrored_negations_conflict() {
        assert!(conflicts(
            "always use const, never var",
            "always use var, never const",
            0.5
        ));
        assert!(conflicts("use tabs", "avoid tabs in this repo", 0.2));
    }

    #[test]
    fn parallel_statements_do_not_conflict() {
        assert!(!conflicts(
            "use zod for request validation",
            "use zod for response validation",
            0.5
        ));
        assert!(!conflicts(
            "cache invalidation is hard",
            "cache warming is easy",
            0.1
        ));
        // Same negation on both sides is agreement, not contradiction
        assert!(!conflicts(
            "never use joi for schemas",
            "never use joi for schema validation",
            0.5
        ));
    }

    #[test]
    fn newer_item_supersedes_older_conflicting_one() {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();

        let mut old = NewMemory::new(MemoryKind::Correction, "Always use const, never var");
        old.timestamp = Some(1_000);
        let old = store.add(old).unwrap().unit;

        let mut new = NewMemory::new(MemoryKind::Correction, "Always use var, never const");
        new.timestamp = Some(2_000);
        let added = store.add(new).unwrap();
        assert!(!added.deduplicated, "opposites must not dedup-merge");
        let new = added.unit;

        let notes = resolve(&mut store, &new, 0.5).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].superseded_id, old.id);

        let old_row = store.get(&old.id).unwrap().unwrap();
        assert!(!old_row.is_active);
        assert_eq!(old_row.superseded_by.as_deref(), Some(new.id.as_str()));

        let edges = store.edges_from(&old.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation, EdgeRelation::SupersededBy);
        assert_eq!(edges[0].target_id, new.id);
    }

    #[test]
    fn low_overlap_is_not_a_contradiction() {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();

        store
            .add(NewMemory::new(
                MemoryKind::Correction,
                "never store secrets in the frontend bundle",
            ))
            .unwrap();
        let new = store
            .add(NewMemory::new(
                MemoryKind::Correction,
                "use prepared statements for every query",
            ))
            .unwrap()
            .unit;

        let notes = resolve(&mut store, &new, 0.5).unwrap();
        assert!(notes.is_empty());
        assert_eq!(store.active_count().unwrap(), 2);
    }
}
