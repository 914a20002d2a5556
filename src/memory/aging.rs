//! The aging engine: decay, cleanup, consolidation, and the learning-rate
//! boost. Every policy is idempotent and safe to invoke repeatedly; the
//! maintenance layer of force-recall runs them back to back.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::config::AgingConfig;
use crate::memory::store::{now_ms, MemoryStore};
use crate::memory::text;
use crate::memory::types::{Edge, EdgeRelation, MemoryKind, MemoryUnit, NewMemory};

/// Importance deltas smaller than this are not worth a write.
const PERSIST_DELTA: f64 = 0.05;

/// Importance after decay, reinforcement, and access-recency, clamped to
/// [0.1, 1.0]. Used live by the ranker and persisted during maintenance.
pub fn effective_importance(unit: &MemoryUnit, now: i64, decay_rate: f64) -> f64 {
    let decay = 1.0 / (1.0 + unit.age_days(now) * decay_rate);
    let access_boost = (1.0 + 0.1 * unit.access_count as f64).min(2.0);

    let accessed_days_ago = unit
        .last_accessed
        .map(|la| ((now - la).max(0)) as f64 / 86_400_000.0);
    let recency_boost = match accessed_days_ago {
        Some(d) if d < 1.0 => 1.3,
        Some(d) if d < 7.0 => 1.1,
        _ => 1.0,
    };

    (unit.importance * decay * access_boost * recency_boost).clamp(0.1, 1.0)
}

/// Recompute and persist importance for the active set. Only writes when the
/// delta exceeds the persistence threshold. Returns the number updated.
pub fn refresh_importance(store: &mut MemoryStore, cfg: &AgingConfig) -> Result<usize> {
    let now = now_ms();
    let mut updated = 0;
    for unit in store.get_active(usize::MAX / 2)? {
        let effective = effective_importance(&unit, now, cfg.decay_rate);
        if (effective - unit.importance).abs() > PERSIST_DELTA {
            store.set_importance(&unit.id, effective)?;
            updated += 1;
        }
    }
    Ok(updated)
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub stale_insights: usize,
    pub stale_items: usize,
    pub cap_evicted: usize,
    pub merged: usize,
}

/// Deactivate never-accessed stale items, enforce the active cap, and merge
/// exact-intent duplicates.
pub fn run_cleanup(
    store: &mut MemoryStore,
    cfg: &AgingConfig,
    active_cap: usize,
) -> Result<CleanupReport> {
    let now = now_ms();
    let mut report = CleanupReport::default();

    let active = store.get_active(usize::MAX / 2)?;
    for unit in &active {
        if unit.access_count > 0 {
            continue;
        }
        let age = unit.age_days(now);
        if unit.kind == MemoryKind::Insight && age >= cfg.insight_stale_days as f64 {
            store.deactivate(&unit.id, None)?;
            report.stale_insights += 1;
        } else if age >= cfg.stale_days as f64 {
            store.deactivate(&unit.id, None)?;
            report.stale_items += 1;
        }
    }

    // Enforce the cap: lowest importance goes first.
    let mut remaining = store.get_active(usize::MAX / 2)?;
    if remaining.len() > active_cap {
        remaining.sort_by(|a, b| {
            a.importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        let excess = remaining.len() - active_cap;
        for unit in remaining.iter().take(excess) {
            store.deactivate(&unit.id, None)?;
            report.cap_evicted += 1;
        }
    }

    report.merged = merge_identical_intents(store)?;
    Ok(report)
}

/// Group active items by (kind, normalized intent); keep the most important
/// member of each group, fold the others in.
fn merge_identical_intents(store: &mut MemoryStore) -> Result<usize> {
    let active = store.get_active(usize::MAX / 2)?;
    let mut groups: HashMap<(MemoryKind, String), Vec<MemoryUnit>> = HashMap::new();
    for unit in active {
        groups
            .entry((unit.kind, text::normalize_intent(&unit.intent)))
            .or_default()
            .push(unit);
    }

    let mut merged = 0;
    for (_, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });
        let keeper = members.remove(0);

        let folded_access: u32 = members.iter().map(|m| m.access_count).sum();
        let boosted = (keeper.importance + 0.05 * members.len() as f64).min(1.0);
        store.set_importance(&keeper.id, boosted)?;
        for _ in 0..folded_access {
            store.touch(&keeper.id)?;
        }

        for loser in &members {
            store.deactivate(&loser.id, Some(&keeper.id))?;
            merged += 1;
        }
        store.log_feedback(
            "merge",
            Some(&keeper.id),
            Some(&serde_json::json!({ "folded": members.len() })),
        )?;
    }
    Ok(merged)
}

#[derive(Debug, Default, Serialize)]
pub struct ConsolidationReport {
    pub groups_found: usize,
    pub items_consolidated: usize,
}

/// Within each kind, cluster similar intents and replace large clusters with
/// a single synthesized pattern item. Scanning order is `timestamp ASC, id`
/// so outcomes are reproducible.
pub fn run_consolidation(store: &mut MemoryStore, cfg: &AgingConfig) -> Result<ConsolidationReport> {
    let mut report = ConsolidationReport::default();

    if store.active_count()? <= cfg.consolidation_active_floor as i64 {
        return Ok(report);
    }

    for kind in MemoryKind::ALL {
        let mut items = store.get_by_kind(kind, usize::MAX / 2)?;
        if items.len() < cfg.consolidation_min_group {
            continue;
        }
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let mut consumed: Vec<bool> = vec![false; items.len()];
        for seed_idx in 0..items.len() {
            if consumed[seed_idx] {
                continue;
            }
            let seed_tokens = text::token_set(&items[seed_idx].intent);

            let mut group_idx = vec![seed_idx];
            for other_idx in (seed_idx + 1)..items.len() {
                if consumed[other_idx] {
                    continue;
                }
                let sim = text::jaccard(
                    &seed_tokens,
                    &text::token_set(&items[other_idx].intent),
                );
                if sim >= cfg.consolidation_similarity {
                    group_idx.push(other_idx);
                }
            }

            if group_idx.len() < cfg.consolidation_min_group {
                continue;
            }

            let group: Vec<&MemoryUnit> = group_idx.iter().map(|&i| &items[i]).collect();
            let merged = synthesize(store, kind, &group)?;
            for &idx in &group_idx {
                consumed[idx] = true;
            }
            report.groups_found += 1;
            report.items_consolidated += group.len();

            for member in &group {
                store.deactivate(&member.id, Some(&merged))?;
                store.add_edge(&Edge {
                    source_id: member.id.clone(),
                    target_id: merged.clone(),
                    relation: EdgeRelation::ReplacedBy,
                    weight: 1.0,
                    timestamp: now_ms(),
                })?;
            }
        }
    }

    Ok(report)
}

/// Build and store the merged item for a consolidation group. Returns its id.
fn synthesize(store: &mut MemoryStore, kind: MemoryKind, group: &[&MemoryUnit]) -> Result<String> {
    let topics = common_topics(group, 0.6, 6);
    let noun = match kind {
        MemoryKind::BugFix => "fixes",
        MemoryKind::Correction => "corrections",
        _ => "items",
    };
    let label = match kind {
        MemoryKind::BugFix => "bug".to_string(),
        other => other.as_str().replace('_', " "),
    };
    let intent = format!(
        "Recurring {label} pattern ({} {noun}): {}",
        group.len(),
        topics.join(" ")
    );

    let avg_importance: f64 =
        group.iter().map(|m| m.importance).sum::<f64>() / group.len() as f64;

    let mut files: Vec<String> = Vec::new();
    let mut tags: Vec<String> = vec!["consolidated".to_string()];
    for member in group {
        for f in &member.related_files {
            if !files.contains(f) {
                files.push(f.clone());
            }
        }
        for t in &member.tags {
            if !tags.contains(t) {
                tags.push(t.clone());
            }
        }
    }
    files.truncate(20);

    let draft = NewMemory {
        kind: Some(kind),
        intent,
        action: String::new(),
        reason: None,
        impact: None,
        outcome: None,
        related_files: files,
        tags,
        timestamp: None,
        confidence: None,
        importance: Some((avg_importance * 1.2).min(1.0)),
        source_event_id: None,
    };
    let outcome = store.add(draft)?;
    Ok(outcome.unit.id)
}

/// Tokens present in at least `commonness` of the group, most frequent first.
fn common_topics(group: &[&MemoryUnit], commonness: f64, cap: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for member in group {
        for token in text::token_set(&member.intent) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    let floor = ((group.len() as f64) * commonness).ceil() as usize;
    let mut topics: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, c)| *c >= floor.max(1))
        .collect();
    topics.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    topics.into_iter().take(cap).map(|(t, _)| t).collect()
}

#[derive(Debug, Default, Serialize)]
pub struct LearningBoostReport {
    /// (topic, correction count) pairs that cleared the repeat threshold.
    pub hot_topics: Vec<(String, usize)>,
    pub boosted: usize,
}

/// Corrections that keep recurring on a topic get pinned near the top of the
/// importance range: three or more repeats → at least 0.95, two → 0.85.
pub fn run_learning_boost(store: &mut MemoryStore) -> Result<LearningBoostReport> {
    let corrections = store.get_by_kind(MemoryKind::Correction, usize::MAX / 2)?;

    let mut by_topic: HashMap<String, Vec<&MemoryUnit>> = HashMap::new();
    for unit in &corrections {
        for token in text::token_set(&unit.intent) {
            by_topic.entry(token).or_default().push(unit);
        }
    }

    let mut report = LearningBoostReport::default();
    let mut floors: HashMap<&str, f64> = HashMap::new();
    for (topic, members) in &by_topic {
        let floor = match members.len() {
            n if n >= 3 => 0.95,
            2 => 0.85,
            _ => continue,
        };
        report.hot_topics.push((topic.clone(), members.len()));
        for member in members {
            let entry = floors.entry(member.id.as_str()).or_insert(0.0);
            if floor > *entry {
                *entry = floor;
            }
        }
    }
    report
        .hot_topics
        .sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for unit in &corrections {
        if let Some(&floor) = floors.get(unit.id.as_str()) {
            if unit.importance < floor {
                store.set_importance(&unit.id, floor)?;
                report.boosted += 1;
            }
        }
    }

    Ok(report)
}
