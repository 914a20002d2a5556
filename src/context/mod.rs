//! The context assembler — the conversation-priming orchestrator.
//!
//! Composes a single capped text blob from layered sections: session
//! bookkeeping, maintenance, attention, recents, hot corrections, core
//! context, anticipation, temporal buckets, workspace state, git memory,
//! topic search with graph enrichment, knowledge gaps, and scanner digests.
//! A section that cannot be produced is silently absent; sections overlap by
//! design and are separated by blank lines.

pub mod git;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::config::CortexConfig;
use crate::embedding::worker::EmbedWorker;
use crate::memory::aging::{self, LearningBoostReport};
use crate::memory::rank::{self, RankContext};
use crate::memory::search::{self, RetrievalFilter};
use crate::memory::store::{now_ms, MemoryStore};
use crate::memory::types::{MemoryKind, MemoryUnit};

/// Hard cap on the assembled context.
pub const MAX_CONTEXT_CHARS: usize = 12_000;

const TRUNCATION_MARKER: &str =
    "\n[context truncated — ask for the rest with a targeted recall_memory query]";

/// Per-kind caps for the core context section.
const CORE_KINDS: [(MemoryKind, usize); 4] = [
    (MemoryKind::Correction, 5),
    (MemoryKind::Decision, 4),
    (MemoryKind::Convention, 4),
    (MemoryKind::BugFix, 3),
];

/// Build the full conversation-priming context for a topic.
pub async fn assemble(
    store: &mut MemoryStore,
    worker: &EmbedWorker,
    cfg: &CortexConfig,
    topic: &str,
    current_file: Option<&str>,
) -> String {
    let mut sections: Vec<String> = Vec::new();
    let git_timeout = Duration::from_secs(cfg.limits.git_timeout_secs);

    // L0 — session boundary
    if let Err(e) = store.open_session(topic) {
        tracing::debug!(error = %e, "session bookkeeping failed");
    }
    sections.push(format!("# memory context: {topic}"));

    // L1 — maintenance; every error is swallowed
    let boost_report = run_maintenance(store, cfg);

    // L2 — attention label
    let mode = rank::infer_mode(topic);
    sections.push(format!("mode: {}", mode.label()));

    // L3 — recent sessions
    if let Some(section) = recent_sessions(store) {
        sections.push(section);
    }

    // L4 — hot corrections
    if let Some(section) = hot_corrections(&boost_report) {
        sections.push(section);
    }

    // L5 — core context
    if let Some(section) = core_context(store, cfg) {
        sections.push(section);
    }

    // L6 — anticipation
    if let Some(file) = current_file {
        if let Some(section) = anticipation(store, file) {
            sections.push(section);
        }
    }

    // L7 — temporal buckets
    if let Some(section) = temporal(store) {
        sections.push(section);
    }

    // L8 — workspace state
    let workspace = git::workspace_state(git_timeout).await;
    if let Some(section) = workspace_section(&workspace) {
        sections.push(section);
    }

    // L8.5 — git memory
    let commits = git::recent_commits(10, git_timeout).await;
    if let Some(section) = git_memory(store, &commits, &workspace) {
        sections.push(section);
    }

    // L9 — topic search with graph enrichment
    if let Some(section) = topic_search(store, worker, cfg, topic, current_file).await {
        sections.push(section);
    }

    // L10 — knowledge gaps
    if let Some(section) = knowledge_gaps(store, Path::new(".")) {
        sections.push(section);
    }

    // L11 — export map digest
    if let Some(section) = scanner_digest(store, "export_map", "exports") {
        sections.push(section);
    }

    // L12 — architecture digest
    if let Some(section) = scanner_digest(store, "architecture", "architecture") {
        sections.push(section);
    }

    truncate_to_budget(sections.join("\n\n"), MAX_CONTEXT_CHARS)
}

/// Enforce the context budget, appending the marker when the tail is cut.
pub fn truncate_to_budget(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text;
    }
    let keep = budget.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

// ── Section builders ─────────────────────────────────────────────────────────

fn run_maintenance(store: &mut MemoryStore, cfg: &CortexConfig) -> LearningBoostReport {
    if let Err(e) = aging::refresh_importance(store, &cfg.aging) {
        tracing::debug!(error = %e, "importance refresh failed");
    }
    if let Err(e) = aging::run_consolidation(store, &cfg.aging) {
        tracing::debug!(error = %e, "consolidation failed");
    }
    match aging::run_learning_boost(store) {
        Ok(report) => report,
        Err(e) => {
            tracing::debug!(error = %e, "learning boost failed");
            LearningBoostReport::default()
        }
    }
}

fn recent_sessions(store: &MemoryStore) -> Option<String> {
    // The first row is the session just opened; show up to 3 before it.
    let sessions = store.recent_sessions(4).ok()?;
    let prior: Vec<String> = sessions
        .iter()
        .skip(1)
        .map(|(day, topic, _)| format!("- {day}: {topic}"))
        .collect();
    if prior.is_empty() {
        return None;
    }
    Some(format!("## recent sessions\n{}", prior.join("\n")))
}

fn hot_corrections(report: &LearningBoostReport) -> Option<String> {
    if report.hot_topics.is_empty() {
        return None;
    }
    let lines: Vec<String> = report
        .hot_topics
        .iter()
        .take(5)
        .map(|(topic, count)| format!("- {topic} ({count} corrections)"))
        .collect();
    Some(format!("## recurring corrections\n{}", lines.join("\n")))
}

fn core_context(store: &MemoryStore, cfg: &CortexConfig) -> Option<String> {
    let now = now_ms();
    let mut units: Vec<MemoryUnit> = Vec::new();
    for (kind, cap) in CORE_KINDS {
        match store.get_by_kind(kind, cap) {
            Ok(batch) => units.extend(batch),
            Err(e) => tracing::debug!(error = %e, %kind, "core context fetch failed"),
        }
    }
    if units.is_empty() {
        return None;
    }
    units.sort_by(|a, b| {
        let ia = aging::effective_importance(a, now, cfg.aging.decay_rate);
        let ib = aging::effective_importance(b, now, cfg.aging.decay_rate);
        ib.partial_cmp(&ia)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.timestamp.cmp(&a.timestamp))
            .then(a.id.cmp(&b.id))
    });
    let lines: Vec<String> = units.iter().map(bullet).collect();
    Some(format!("## core context\n{}", lines.join("\n")))
}

fn anticipation(store: &MemoryStore, current_file: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut push_units = |label: &str, units: Vec<MemoryUnit>, lines: &mut Vec<String>| {
        for unit in units.into_iter().take(3) {
            if seen.insert(unit.id.clone()) {
                lines.push(format!("- ({label}) {}", unit.intent));
            }
        }
    };

    if let Ok(units) = store.get_by_file(current_file, 5) {
        push_units("this file", units, &mut lines);
    }
    if let Some(parent) = Path::new(current_file).parent().and_then(|p| p.to_str()) {
        if !parent.is_empty() {
            if let Ok(units) = store.get_by_file(parent, 5) {
                push_units("same directory", units, &mut lines);
            }
        }
    }
    if let Some(ext) = Path::new(current_file).extension().and_then(|e| e.to_str()) {
        if let Ok(units) = store.get_by_file(&format!(".{ext}"), 5) {
            push_units("file type", units, &mut lines);
        }
    }

    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "## likely relevant for {current_file}\n{}",
        lines.join("\n")
    ))
}

fn temporal(store: &MemoryStore) -> Option<String> {
    let now = now_ms();
    let units = store.get_active(200).ok()?;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 86_400_000;
    let buckets: [(&str, i64, i64); 4] = [
        ("last hour", 0, HOUR),
        ("today", HOUR, DAY),
        ("yesterday", DAY, 2 * DAY),
        ("this week", 2 * DAY, 7 * DAY),
    ];

    let mut out: Vec<String> = Vec::new();
    for (label, newer_than, older_than) in buckets {
        let mut bucket: Vec<&MemoryUnit> = units
            .iter()
            .filter(|u| {
                let age = now - u.timestamp;
                age >= newer_than && age < older_than
            })
            .collect();
        if bucket.is_empty() {
            continue;
        }
        bucket.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out.push(format!("{label}:"));
        for unit in bucket.into_iter().take(5) {
            out.push(format!("  {}", bullet(unit)));
        }
    }

    if out.is_empty() {
        return None;
    }
    Some(format!("## recent activity\n{}", out.join("\n")))
}

fn workspace_section(state: &git::WorkspaceState) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    if let Some(branch) = &state.branch {
        lines.push(format!("branch: {branch}"));
    }
    if !state.recent.is_empty() {
        lines.push("last commits:".into());
        lines.extend(state.recent.iter().map(|c| format!("  {c}")));
    }
    if let Some(stat) = &state.diff_stat {
        lines.push("working tree:".into());
        lines.push(stat.clone());
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!("## workspace\n{}", lines.join("\n")))
}

fn git_memory(
    store: &mut MemoryStore,
    commits: &[git::CommitRecord],
    workspace: &git::WorkspaceState,
) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();

    let stored = git::ingest_commits(store, commits);
    if stored > 0 {
        lines.push(format!("captured {stored} new commits as memories"));
    }
    if !workspace.uncommitted.is_empty() {
        lines.push("uncommitted changes:".into());
        lines.extend(workspace.uncommitted.iter().map(|l| format!("  {l}")));
    }

    if lines.is_empty() {
        return None;
    }
    Some(format!("## git memory\n{}", lines.join("\n")))
}

async fn topic_search(
    store: &mut MemoryStore,
    worker: &EmbedWorker,
    cfg: &CortexConfig,
    topic: &str,
    current_file: Option<&str>,
) -> Option<String> {
    let query_vec = worker
        .embed_query(topic, Duration::from_secs(cfg.embedding.embed_timeout_secs))
        .await;

    let candidates = match search::retrieve(
        store,
        topic,
        query_vec.as_deref(),
        current_file,
        cfg.retrieval.default_max_results,
        &RetrievalFilter::default(),
        &cfg.retrieval,
    ) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::debug!(error = %e, "topic search failed");
            return None;
        }
    };

    let ctx = RankContext::new(topic, current_file, cfg.aging.decay_rate);
    let ranked = rank::rank(candidates, &ctx);
    if ranked.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    let mut listed: HashSet<String> = HashSet::new();
    for candidate in &ranked {
        listed.insert(candidate.unit.id.clone());
        lines.push(bullet(&candidate.unit));
        if let Err(e) = store.touch(&candidate.unit.id) {
            tracing::debug!(error = %e, "reinforcement touch failed");
        }
    }

    // 1-hop graph enrichment of the top results, discounted to 0.7.
    for candidate in ranked.iter().take(3) {
        if let Ok(neighbours) = store.get_related(&candidate.unit.id, 1, 5) {
            for (unit, _) in neighbours {
                if listed.insert(unit.id.clone()) {
                    lines.push(format!("  ↳ related: {}", unit.intent));
                }
            }
        }
    }

    if let Err(e) = store.record_signal("force_recall", Some(topic)) {
        tracing::debug!(error = %e, "signal logging failed");
    }

    Some(format!("## on \"{topic}\"\n{}", lines.join("\n")))
}

/// Source directories with no item references at all — places the store is
/// blind to.
fn knowledge_gaps(store: &MemoryStore, root: &Path) -> Option<String> {
    let referenced: HashSet<String> = store
        .get_active(usize::MAX / 2)
        .ok()?
        .into_iter()
        .flat_map(|u| u.related_files)
        .collect();

    let mut gaps: Vec<String> = Vec::new();
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_dir()
            || name.starts_with('.')
            || matches!(name, "target" | "node_modules" | "dist" | "build" | "vendor")
        {
            continue;
        }
        if !contains_code(&path) {
            continue;
        }
        let mentioned = referenced.iter().any(|f| f.contains(name));
        if !mentioned {
            gaps.push(name.to_string());
        }
    }
    gaps.sort();
    gaps.truncate(8);

    if gaps.is_empty() {
        return None;
    }
    Some(format!(
        "## knowledge gaps\nno memories reference: {}",
        gaps.join(", ")
    ))
}

fn contains_code(dir: &Path) -> bool {
    const CODE_EXTS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb"];
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().take(200).any(|e| {
        e.path()
            .extension()
            .and_then(|x| x.to_str())
            .map(|x| CODE_EXTS.contains(&x))
            .unwrap_or(false)
    })
}

/// Render a scanner digest stored in adaptive_config by an external scan.
fn scanner_digest(store: &MemoryStore, key: &str, title: &str) -> Option<String> {
    let raw = store.get_adaptive(key).ok()??;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let rendered = render_digest(&value)?;
    Some(format!("## {title}\n{rendered}"))
}

fn render_digest(value: &serde_json::Value) -> Option<String> {
    let object = value.as_object()?;
    let mut lines: Vec<String> = Vec::new();
    for (key, entry) in object.iter().take(12) {
        match entry {
            serde_json::Value::Array(items) => {
                let shown: Vec<&str> =
                    items.iter().filter_map(|v| v.as_str()).take(6).collect();
                lines.push(format!("- {key}: {}", shown.join(", ")));
            }
            serde_json::Value::String(s) => lines.push(format!("- {key}: {s}")),
            other => lines.push(format!("- {key}: {other}")),
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn bullet(unit: &MemoryUnit) -> String {
    let files = if unit.related_files.is_empty() {
        String::new()
    } else {
        format!(" [{}]", unit.related_files.join(", "))
    };
    format!("- ({}) {}{files}", unit.kind, unit.intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashed::HashedEmbedder;
    use crate::memory::types::NewMemory;

    fn fixtures() -> (MemoryStore, EmbedWorker, CortexConfig) {
        let store = MemoryStore::open_in_memory(0.7).unwrap();
        let worker = EmbedWorker::spawn(Box::new(HashedEmbedder::new()));
        (store, worker, CortexConfig::default())
    }

    #[tokio::test]
    async fn assembles_header_mode_and_core_sections() {
        let (mut store, worker, cfg) = fixtures();
        store
            .add(NewMemory::new(
                MemoryKind::Correction,
                "actually the session cookie is http only",
            ))
            .unwrap();
        store
            .add(NewMemory::new(
                MemoryKind::Decision,
                "sessions are stored server side in redis",
            ))
            .unwrap();

        let context = assemble(&mut store, &worker, &cfg, "fix the session bug", None).await;

        assert!(context.starts_with("# memory context: fix the session bug"));
        assert!(context.contains("mode: debugging"));
        assert!(context.contains("## core context"));
        assert!(context.contains("session cookie"));
        assert!(context.chars().count() <= MAX_CONTEXT_CHARS);
        worker.shutdown();
    }

    #[tokio::test]
    async fn topic_search_touches_results() {
        let (mut store, worker, cfg) = fixtures();
        let id = store
            .add(NewMemory::new(
                MemoryKind::Convention,
                "the payments module wraps stripe errors in domain errors",
            ))
            .unwrap()
            .unit
            .id;

        let _ = assemble(&mut store, &worker, &cfg, "payments stripe handling", None).await;

        let unit = store.get(&id).unwrap().unwrap();
        assert!(unit.access_count >= 1);
        worker.shutdown();
    }

    #[tokio::test]
    async fn graph_neighbours_enrich_topic_results() {
        let (mut store, worker, cfg) = fixtures();
        let hit = store
            .add(NewMemory::new(
                MemoryKind::Decision,
                "invoice numbering is sequential per tenant",
            ))
            .unwrap()
            .unit
            .id;
        let neighbour = store
            .add(NewMemory::new(
                MemoryKind::Insight,
                "tenants share nothing at the storage layer",
            ))
            .unwrap()
            .unit
            .id;
        store
            .add_edge(&crate::memory::types::Edge {
                source_id: hit.clone(),
                target_id: neighbour.clone(),
                relation: crate::memory::types::EdgeRelation::RelatedTo,
                weight: 0.9,
                timestamp: now_ms(),
            })
            .unwrap();

        let context = assemble(&mut store, &worker, &cfg, "invoice numbering", None).await;
        assert!(context.contains("related: tenants share nothing"));
        worker.shutdown();
    }

    #[tokio::test]
    async fn anticipation_appears_with_current_file() {
        let (mut store, worker, cfg) = fixtures();
        let mut draft = NewMemory::new(
            MemoryKind::Convention,
            "login handlers must rate limit by account id",
        );
        draft.related_files = vec!["src/auth/login.ts".into()];
        store.add(draft).unwrap();

        let context = assemble(
            &mut store,
            &worker,
            &cfg,
            "harden the login flow",
            Some("src/auth/login.ts"),
        )
        .await;
        assert!(context.contains("## likely relevant for src/auth/login.ts"));
        worker.shutdown();
    }

    #[tokio::test]
    async fn sessions_accumulate_across_assemblies() {
        let (mut store, worker, cfg) = fixtures();
        let _ = assemble(&mut store, &worker, &cfg, "first topic", None).await;
        let second = assemble(&mut store, &worker, &cfg, "second topic", None).await;
        assert!(second.contains("## recent sessions"));
        assert!(second.contains("first topic"));
        worker.shutdown();
    }

    #[test]
    fn budget_truncation_appends_marker() {
        let long = "x".repeat(20_000);
        let out = truncate_to_budget(long, MAX_CONTEXT_CHARS);
        assert_eq!(out.chars().count(), MAX_CONTEXT_CHARS);
        assert!(out.ends_with("recall_memory query]"));

        let short = "short context".to_string();
        assert_eq!(truncate_to_budget(short.clone(), MAX_CONTEXT_CHARS), short);
    }

    #[test]
    fn scanner_digest_renders_stored_map() {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();
        store
            .set_adaptive(
                "export_map",
                r#"{"src/auth": ["login", "logout"], "src/billing": ["invoice"]}"#,
            )
            .unwrap();

        let section = scanner_digest(&store, "export_map", "exports").unwrap();
        assert!(section.contains("## exports"));
        assert!(section.contains("src/auth: login, logout"));
    }
}
