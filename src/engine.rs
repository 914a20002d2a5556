//! The engine: every in-process shared resource in one explicit value.
//!
//! Owns the store (absent in degraded mode), the embedding worker, the recall
//! cache, and the per-session rate counters. The adapter constructs one
//! engine at startup, drives it one request at a time, and closes it on EOF —
//! read-your-writes ordering falls out of the serial call discipline.
//!
//! Tool methods return `Result<String, String>`: `Ok` is the text payload,
//! `Err` is a human-readable reason the adapter wraps as a result-level
//! error. Neither variant ever becomes a JSON-RPC error frame.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::CortexConfig;
use crate::context;
use crate::embedding;
use crate::embedding::worker::EmbedWorker;
use crate::memory::contradiction;
use crate::memory::export::{export_bundle, import_bundle, Bundle};
use crate::memory::quality;
use crate::memory::rank::{self, RankContext};
use crate::memory::search::{self, Candidate, RetrievalFilter};
use crate::memory::stats;
use crate::memory::store::{now_ms, MemoryStore, UpdateFields};
use crate::memory::text;
use crate::memory::types::{Edge, EdgeRelation, MemoryKind, NewMemory};

const MAX_QUERY_CHARS: usize = 1_000;
const MAX_STORE_CONTENT_CHARS: usize = 5_000;
const MIN_AUTO_LEARN_CHARS: usize = 20;
const MIN_QUICK_STORE_CHARS: usize = 5;

/// Per-session (process lifetime) call budgets.
struct RateCounters {
    store_calls: u32,
    auto_learn_calls: u32,
    total_calls: u32,
}

/// Small LRU with TTL for recall results, keyed by (query, max_results).
struct RecallCache {
    entries: HashMap<(String, usize), (Instant, String)>,
    capacity: usize,
    ttl: Duration,
}

impl RecallCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    fn get(&mut self, key: &(String, usize)) -> Option<String> {
        let (stamp, text) = self.entries.get(key)?;
        if stamp.elapsed() > self.ttl {
            self.entries.remove(key);
            return None;
        }
        Some(text.clone())
    }

    fn put(&mut self, key: (String, usize), text: String) {
        if self.entries.len() >= self.capacity {
            // Evict the oldest entry
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (stamp, _))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (Instant::now(), text));
    }

    fn invalidate(&mut self) {
        self.entries.clear();
    }
}

pub struct Engine {
    cfg: CortexConfig,
    /// `None` in degraded mode: storage failed to initialize but the process
    /// keeps serving so the client can still reach `health_check`.
    store: Option<MemoryStore>,
    init_error: Option<String>,
    worker: EmbedWorker,
    cache: RecallCache,
    limits: RateCounters,
    db_path: Option<PathBuf>,
}

impl Engine {
    /// Construct the engine. A storage failure yields a degraded engine, not
    /// an error — exiting would silently drop the hosting client's session.
    pub fn new(cfg: CortexConfig) -> Self {
        let db_path = cfg.resolved_db_path();
        let (store, init_error, db_path) =
            match MemoryStore::open(&db_path, cfg.ranking.dedup_threshold) {
                Ok(mut store) => {
                    seed_identity(&mut store);
                    (Some(store), None, Some(db_path))
                }
                Err(e) => {
                    tracing::error!(error = %e, "storage init failed — entering degraded mode");
                    (None, Some(format!("{e:#}")), None)
                }
            };

        let provider = embedding::create_provider(&cfg.embedding).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "embedding provider init failed, using hashed fallback");
            Box::new(embedding::hashed::HashedEmbedder::new())
        });
        let worker = EmbedWorker::spawn(provider);

        let cache = RecallCache::new(
            cfg.retrieval.cache_entries,
            Duration::from_secs(cfg.retrieval.cache_ttl_secs),
        );

        Self {
            limits: RateCounters {
                store_calls: 0,
                auto_learn_calls: 0,
                total_calls: 0,
            },
            cache,
            worker,
            store,
            init_error,
            db_path,
            cfg,
        }
    }

    /// Build an engine over an in-memory store (tests).
    pub fn in_memory(cfg: CortexConfig) -> Self {
        let store = MemoryStore::open_in_memory(cfg.ranking.dedup_threshold)
            .expect("in-memory store");
        let worker = EmbedWorker::spawn(Box::new(embedding::hashed::HashedEmbedder::new()));
        let cache = RecallCache::new(
            cfg.retrieval.cache_entries,
            Duration::from_secs(cfg.retrieval.cache_ttl_secs),
        );
        Self {
            limits: RateCounters {
                store_calls: 0,
                auto_learn_calls: 0,
                total_calls: 0,
            },
            cache,
            worker,
            store: Some(store),
            init_error: None,
            db_path: None,
            cfg,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    /// Direct store access for tooling and integration tests. `None` in
    /// degraded mode.
    pub fn store_handle(&self) -> Option<&MemoryStore> {
        self.store.as_ref()
    }

    pub fn store_handle_mut(&mut self) -> Option<&mut MemoryStore> {
        self.store.as_mut()
    }

    pub fn config(&self) -> &CortexConfig {
        &self.cfg
    }

    /// Called before each request: apply embeddings the worker finished while
    /// previous requests were running. Keeps the single-writer invariant —
    /// only the request loop ever writes to the store.
    pub fn absorb_embeddings(&mut self) {
        let completed = self.worker.drain_completed();
        if completed.is_empty() {
            return;
        }
        let Some(store) = self.store.as_mut() else {
            return;
        };
        for done in completed {
            if let Err(e) = store.put_vector(&done.id, &done.vector) {
                tracing::warn!(error = %e, id = %done.id, "vector write failed");
            }
        }
    }

    /// Per-call bookkeeping shared by every tool. Returns a result-level
    /// error once the session budget is spent.
    pub fn admit_call(&mut self) -> Result<(), String> {
        self.limits.total_calls += 1;
        if self.limits.total_calls > self.cfg.limits.max_total_calls {
            return Err(format!(
                "session call budget exhausted ({} calls); restart the server to continue",
                self.cfg.limits.max_total_calls
            ));
        }
        Ok(())
    }

    fn store_mut(&mut self) -> Result<&mut MemoryStore, String> {
        let degraded = self.degraded_message();
        self.store.as_mut().ok_or(degraded)
    }

    fn store_ref(&self) -> Result<&MemoryStore, String> {
        self.store.as_ref().ok_or_else(|| self.degraded_message())
    }

    fn degraded_message(&self) -> String {
        format!(
            "storage unavailable (degraded mode): {}",
            self.init_error.as_deref().unwrap_or("unknown init failure")
        )
    }

    // ── recall ───────────────────────────────────────────────────────────────

    pub async fn recall(
        &mut self,
        query: &str,
        max_results: Option<usize>,
        current_file: Option<&str>,
    ) -> Result<String, String> {
        if query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!("query exceeds {MAX_QUERY_CHARS} chars"));
        }
        let max_results = max_results
            .unwrap_or(self.cfg.retrieval.default_max_results)
            .clamp(1, self.cfg.retrieval.max_results_cap);

        let cache_key = (query.to_string(), max_results);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let query_vec = self
            .worker
            .embed_query(
                query,
                Duration::from_secs(self.cfg.embedding.embed_timeout_secs),
            )
            .await;

        let cfg = self.cfg.clone();
        let store = self.store_mut()?;

        let candidates = search::retrieve(
            store,
            query,
            query_vec.as_deref(),
            current_file,
            max_results,
            &RetrievalFilter::default(),
            &cfg.retrieval,
        )
        .map_err(|e| format!("retrieval failed: {e:#}"))?;

        let ctx = RankContext::new(query, current_file, cfg.aging.decay_rate);
        let ranked = rank::rank(candidates, &ctx);

        // 1-hop graph enrichment at a 0.7 discount, then reinforcement.
        let enriched = enrich_with_neighbours(store, ranked, max_results);
        for candidate in &enriched {
            if let Err(e) = store.touch(&candidate.unit.id) {
                tracing::debug!(error = %e, "reinforcement touch failed");
            }
        }
        if let Err(e) = store.record_signal("recall", Some(query)) {
            tracing::debug!(error = %e, "signal logging failed");
        }

        let text = format_recall(query, &enriched);
        self.cache.put(cache_key, text.clone());

        // Opportunistic housekeeping: every 25th call sweeps stale items and
        // enforces the active cap, off the critical first calls of a session.
        if self.limits.total_calls % 25 == 0 {
            let aging_cfg = self.cfg.aging.clone();
            let active_cap = self.cfg.storage.active_cap;
            if let Ok(store) = self.store_mut() {
                if let Err(e) = crate::memory::aging::run_cleanup(store, &aging_cfg, active_cap) {
                    tracing::debug!(error = %e, "opportunistic cleanup failed");
                }
            }
        }
        Ok(text)
    }

    // ── store ────────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn store_memory(
        &mut self,
        kind_str: &str,
        content: &str,
        reason: Option<&str>,
        files: Vec<String>,
        tags: Vec<String>,
    ) -> Result<String, String> {
        self.limits.store_calls += 1;
        if self.limits.store_calls > self.cfg.limits.max_store_calls {
            return Err(format!(
                "store budget exhausted ({} per session)",
                self.cfg.limits.max_store_calls
            ));
        }

        let kind: MemoryKind = kind_str.parse()?;
        if content.chars().count() > MAX_STORE_CONTENT_CHARS {
            return Err(format!(
                "content exceeds {MAX_STORE_CONTENT_CHARS} chars at the tool boundary"
            ));
        }
        quality::check_with_max(content, MAX_STORE_CONTENT_CHARS)
            .map_err(|reason| format!("rejected: {reason}"))?;

        self.persist(kind, content, reason, files, tags)
    }

    pub fn quick_store(&mut self, memory: &str) -> Result<String, String> {
        self.limits.store_calls += 1;
        if self.limits.store_calls > self.cfg.limits.max_store_calls {
            return Err(format!(
                "store budget exhausted ({} per session)",
                self.cfg.limits.max_store_calls
            ));
        }
        if memory.chars().count() < MIN_QUICK_STORE_CHARS {
            return Err(format!("memory must be at least {MIN_QUICK_STORE_CHARS} chars"));
        }
        quality::check(memory).map_err(|reason| format!("rejected: {reason}"))?;

        let kind = classify_text(memory);
        self.persist(kind, memory, None, Vec::new(), Vec::new())
    }

    /// Shared write path: event log → add (dedup-aware) → contradiction sweep
    /// → async embedding schedule.
    fn persist(
        &mut self,
        kind: MemoryKind,
        content: &str,
        reason: Option<&str>,
        files: Vec<String>,
        tags: Vec<String>,
    ) -> Result<String, String> {
        let threshold = self.contradiction_threshold();
        let store = self.store_mut()?;

        let event_id = store
            .record_event("store", "mcp", content, files.first().map(|s| s.as_str()), None)
            .ok();

        let intent = derive_intent(content);
        let action = text::truncate_chars(content, 500);
        let mut draft = NewMemory::new(kind, intent);
        draft.action = action;
        draft.reason = reason.map(|r| r.to_string());
        draft.related_files = files;
        draft.tags = tags;
        draft.source_event_id = event_id;

        let outcome = store.add(draft).map_err(|e| format!("store failed: {e:#}"))?;
        if let Some(event_id) = event_id {
            let _ = store.mark_event_processed(event_id);
        }

        let mut lines = vec![format!(
            "{} memory {} ({})",
            if outcome.deduplicated {
                "Reinforced existing"
            } else {
                "Stored"
            },
            outcome.unit.id,
            outcome.unit.kind
        )];

        if !outcome.deduplicated {
            let notes = contradiction::resolve(store, &outcome.unit, threshold)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "contradiction sweep failed");
                    Vec::new()
                });
            for note in notes {
                lines.push(format!(
                    "Superseded conflicting memory {} (\"{}\")",
                    note.superseded_id, note.superseded_intent
                ));
            }

            self.worker
                .schedule(&outcome.unit.id, &outcome.unit.intent);
        }

        self.cache.invalidate();
        Ok(lines.join("\n"))
    }

    fn contradiction_threshold(&self) -> f64 {
        let configured = self.cfg.ranking.contradiction_threshold;
        self.store
            .as_ref()
            .and_then(|s| s.get_adaptive("contradiction_threshold").ok().flatten())
            .and_then(|v| v.parse().ok())
            .unwrap_or(configured)
    }

    // ── force recall / context ───────────────────────────────────────────────

    pub async fn force_recall(
        &mut self,
        topic: &str,
        current_file: Option<&str>,
    ) -> Result<String, String> {
        if topic.trim().is_empty() {
            return Err("topic must not be empty".into());
        }
        let Engine {
            store,
            worker,
            cfg,
            cache,
            init_error,
            ..
        } = self;
        let Some(store) = store.as_mut() else {
            return Err(format!(
                "storage unavailable (degraded mode): {}",
                init_error.as_deref().unwrap_or("unknown init failure")
            ));
        };
        cache.invalidate();
        Ok(context::assemble(store, worker, cfg, topic, current_file).await)
    }

    pub async fn get_context(&mut self) -> Result<String, String> {
        let topic = self
            .store_ref()?
            .get_identity("project")
            .ok()
            .flatten()
            .unwrap_or_else(|| "general".to_string());
        self.force_recall(&topic, None).await
    }

    // ── auto learn ───────────────────────────────────────────────────────────

    pub fn auto_learn(&mut self, input: &str, hint: Option<&str>) -> Result<String, String> {
        self.limits.auto_learn_calls += 1;
        if self.limits.auto_learn_calls > self.cfg.limits.max_auto_learn_calls {
            return Err(format!(
                "auto_learn budget exhausted ({} per session)",
                self.cfg.limits.max_auto_learn_calls
            ));
        }
        if input.chars().count() < MIN_AUTO_LEARN_CHARS {
            return Err(format!(
                "text must be at least {MIN_AUTO_LEARN_CHARS} chars"
            ));
        }

        let candidates = extract_candidates(input);
        if candidates.is_empty() {
            return Ok("No memorable statements found.".into());
        }

        let mut stored = 0;
        let mut skipped = 0;
        for sentence in candidates {
            let kind = classify_text(&sentence);
            let tags = hint
                .map(|h| vec![h.to_lowercase()])
                .unwrap_or_default();
            match self.persist(kind, &sentence, None, Vec::new(), tags) {
                Ok(note) => {
                    if note.starts_with("Stored") {
                        stored += 1;
                    } else {
                        skipped += 1;
                    }
                }
                Err(_) => skipped += 1,
            }
        }
        Ok(format!(
            "Learned {stored} new memories ({skipped} skipped)."
        ))
    }

    // ── mutation tools ───────────────────────────────────────────────────────

    pub fn update_memory(
        &mut self,
        id: &str,
        content: &str,
        reason: Option<&str>,
    ) -> Result<String, String> {
        quality::check(content).map_err(|reason| format!("rejected: {reason}"))?;
        let store = self.store_mut()?;

        let Some(original) = store.get(id).map_err(|e| e.to_string())? else {
            return Err(format!("memory not found: {id}"));
        };
        if !original.is_active {
            return Err(format!("memory is inactive: {id}"));
        }

        // An update is a replacement item, not an in-place edit: the original
        // stays in the graph, superseded.
        let mut draft = NewMemory::new(original.kind, derive_intent(content));
        draft.action = text::truncate_chars(content, 500);
        draft.reason = reason
            .map(|r| r.to_string())
            .or_else(|| original.reason.clone());
        draft.related_files = original.related_files.clone();
        draft.tags = original.tags.clone();
        draft.confidence = Some(original.confidence);
        draft.importance = Some(original.importance);

        let outcome = store.add(draft).map_err(|e| format!("update failed: {e:#}"))?;
        if outcome.unit.id != original.id {
            store
                .deactivate(&original.id, Some(&outcome.unit.id))
                .map_err(|e| e.to_string())?;
            store
                .add_edge(&Edge {
                    source_id: original.id.clone(),
                    target_id: outcome.unit.id.clone(),
                    relation: EdgeRelation::SupersededBy,
                    weight: 1.0,
                    timestamp: now_ms(),
                })
                .map_err(|e| e.to_string())?;
            self.worker.schedule(&outcome.unit.id, &outcome.unit.intent);
        }

        self.cache.invalidate();
        Ok(format!(
            "Updated: {} now superseded by {}",
            original.id, outcome.unit.id
        ))
    }

    pub fn delete_memory(&mut self, id: &str, reason: Option<&str>) -> Result<String, String> {
        let store = self.store_mut()?;
        let Some(unit) = store.get(id).map_err(|e| e.to_string())? else {
            return Err(format!("memory not found: {id}"));
        };
        if !unit.is_active {
            return Ok(format!("Memory {id} was already deleted."));
        }
        store.deactivate(id, None).map_err(|e| e.to_string())?;
        store
            .log_feedback(
                "delete",
                Some(id),
                Some(&serde_json::json!({ "reason": reason })),
            )
            .map_err(|e| e.to_string())?;
        self.cache.invalidate();
        Ok(format!("Deleted memory {id}."))
    }

    pub fn list_memories(
        &mut self,
        kind_filter: Option<&str>,
        limit: Option<usize>,
    ) -> Result<String, String> {
        let limit = limit.unwrap_or(20).clamp(1, 100);
        let store = self.store_ref()?;

        let kinds: Vec<MemoryKind> = match kind_filter {
            Some(raw) => vec![raw.parse()?],
            None => MemoryKind::ALL.to_vec(),
        };

        let mut out: Vec<String> = Vec::new();
        for kind in kinds {
            let units = store.get_by_kind(kind, limit).map_err(|e| e.to_string())?;
            if units.is_empty() {
                continue;
            }
            out.push(format!("{} ({}):", kind, units.len()));
            for unit in units {
                out.push(format!("  {} — {}", unit.id, unit.intent));
            }
        }
        if out.is_empty() {
            return Ok("No active memories.".into());
        }
        Ok(out.join("\n"))
    }

    // ── diagnostics, export, scanners ────────────────────────────────────────

    pub fn get_stats(&mut self) -> Result<String, String> {
        let db_path = self.db_path.clone();
        let store = self.store_ref()?;
        let report = stats::collect(store, db_path.as_deref()).map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
    }

    pub fn health_check(&mut self) -> Result<String, String> {
        let mut health = serde_json::json!({
            "status": if self.is_degraded() { "degraded" } else { "ok" },
            "embedder": {
                "provider": self.worker.provider_name(),
                "ready": self.worker.ready(),
            },
            "calls_used": self.limits.total_calls,
        });
        if let Some(error) = &self.init_error {
            health["error"] = serde_json::json!(error);
        }
        if let Some(store) = self.store.as_ref() {
            if let Ok(report) = crate::db::check_database_health(store.connection()) {
                health["database"] = serde_json::json!({
                    "schema_version": report.schema_version,
                    "integrity_ok": report.integrity_ok,
                    "items": report.item_count,
                    "active": report.active_count,
                    "vectors": report.vector_count,
                });
            }
        }
        serde_json::to_string_pretty(&health).map_err(|e| e.to_string())
    }

    pub fn export_memories(&mut self) -> Result<String, String> {
        let store = self.store_ref()?;
        let bundle = export_bundle(store).map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&bundle).map_err(|e| e.to_string())
    }

    pub fn import_memories(&mut self, data: &str) -> Result<String, String> {
        let bundle: Bundle =
            serde_json::from_str(data).map_err(|e| format!("invalid bundle: {e}"))?;
        let store = self.store_mut()?;
        let report = import_bundle(store, &bundle).map_err(|e| e.to_string())?;
        self.cache.invalidate();
        Ok(format!(
            "Imported {} memories ({} skipped, {} errors).",
            report.imported, report.skipped, report.errors
        ))
    }

    pub fn scan_project(&mut self, root: Option<&str>) -> Result<String, String> {
        let root = PathBuf::from(root.unwrap_or("."));
        let digest = crate::project::scan(&root).map_err(|e| e.to_string())?;
        let store = self.store_mut()?;
        store
            .set_adaptive("export_map", &digest.export_map.to_string())
            .map_err(|e| e.to_string())?;
        store
            .set_adaptive("architecture", &digest.architecture.to_string())
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "Scanned {} directories, {} source files.",
            digest.directories, digest.files
        ))
    }

    pub fn verify_files(&mut self) -> Result<String, String> {
        let store = self.store_ref()?;
        let units = store.get_active(usize::MAX / 2).map_err(|e| e.to_string())?;

        let mut missing: Vec<String> = Vec::new();
        let mut checked = 0usize;
        for unit in &units {
            for file in &unit.related_files {
                checked += 1;
                if !std::path::Path::new(file).exists() {
                    missing.push(format!("{} (memory {})", file, unit.id));
                }
            }
        }
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            Ok(format!("All {checked} referenced files exist."))
        } else {
            Ok(format!(
                "{} of {checked} referenced files are missing:\n{}",
                missing.len(),
                missing.join("\n")
            ))
        }
    }

    pub fn verify_code(&mut self, file: &str, symbol: Option<&str>) -> Result<String, String> {
        let path = std::path::Path::new(file);
        if !path.exists() {
            return Ok(format!("{file}: missing"));
        }
        match symbol {
            None => Ok(format!("{file}: exists")),
            Some(symbol) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|e| format!("unreadable: {e}"))?;
                if contents.contains(symbol) {
                    Ok(format!("{file}: symbol \"{symbol}\" present"))
                } else {
                    Ok(format!("{file}: symbol \"{symbol}\" NOT found — stale reference"))
                }
            }
        }
    }

    /// Clean shutdown: apply pending embeddings, checkpoint, stop the worker.
    pub fn close(mut self) {
        self.absorb_embeddings();
        if let Some(store) = self.store.take() {
            if let Err(e) = store.checkpoint() {
                tracing::warn!(error = %e, "checkpoint on close failed");
            }
        }
        self.worker.shutdown();
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Record who this store belongs to, once.
fn seed_identity(store: &mut MemoryStore) {
    match store.get_identity("project") {
        Ok(Some(_)) => {}
        _ => {
            let project = std::env::current_dir()
                .ok()
                .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "workspace".to_string());
            if let Err(e) = store.set_identity("project", &project) {
                tracing::debug!(error = %e, "identity seed failed");
            }
            let _ = store.set_identity("installed_at", &now_ms().to_string());
        }
    }
}

/// First sentence (or the whole text) squeezed into the intent bound.
fn derive_intent(content: &str) -> String {
    let first = content
        .split_terminator(['.', '\n', '!', '?'])
        .map(str::trim)
        .find(|s| s.chars().count() >= 15)
        .unwrap_or_else(|| content.trim());
    text::truncate_chars(first, 300)
}

/// Keyword classification used by quick_store and auto_learn.
fn classify_text(memory: &str) -> MemoryKind {
    let lower = memory.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if has(&["actually", "no,", "wrong", "instead", "correction", "my mistake"]) {
        MemoryKind::Correction
    } else if has(&["fixed", "fix", "bug", "crash", "error"]) {
        MemoryKind::BugFix
    } else if has(&["always", "never", "convention", "style", "prefer"]) {
        MemoryKind::Convention
    } else if has(&["decided", "decision", "chose", "we will", "use"]) {
        MemoryKind::Decision
    } else {
        MemoryKind::Insight
    }
}

/// Sentences worth learning from free text: imperative or corrective ones.
fn extract_candidates(input: &str) -> Vec<String> {
    const MARKERS: &[&str] = &[
        "always", "never", "use", "avoid", "prefer", "don't", "do not", "should", "must",
        "actually", "instead",
    ];
    input
        .split_terminator(['.', '\n', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().count() >= 15 && s.chars().count() <= 500)
        .filter(|s| {
            let lower = s.to_lowercase();
            MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(|s| s.to_string())
        .take(10)
        .collect()
}

/// Append 1-hop neighbours of the top results at a 0.7 score discount.
fn enrich_with_neighbours(
    store: &MemoryStore,
    ranked: Vec<Candidate>,
    max_results: usize,
) -> Vec<Candidate> {
    let mut listed: std::collections::HashSet<String> =
        ranked.iter().map(|c| c.unit.id.clone()).collect();
    let mut enriched = ranked;

    let top: Vec<(String, f64)> = enriched
        .iter()
        .take(3)
        .map(|c| (c.unit.id.clone(), c.score))
        .collect();

    for (id, parent_score) in top {
        let Ok(neighbours) = store.get_related(&id, 1, 5) else {
            continue;
        };
        for (unit, depth) in neighbours {
            if !listed.insert(unit.id.clone()) {
                continue;
            }
            let score = parent_score * 0.7 / (depth as f64 + 1.0);
            let mut methods = std::collections::BTreeSet::new();
            methods.insert("graph");
            enriched.push(Candidate {
                unit,
                score,
                match_methods: methods,
            });
        }
    }

    search::sort_candidates(&mut enriched);
    enriched.truncate(max_results);
    enriched
}

fn format_recall(query: &str, results: &[Candidate]) -> String {
    if results.is_empty() {
        return format!("No memories matched \"{query}\".");
    }
    let mut lines = vec![format!("{} memories for \"{query}\":", results.len())];
    for (i, candidate) in results.iter().enumerate() {
        let methods: Vec<&str> = candidate.match_methods.iter().copied().collect();
        let files = if candidate.unit.related_files.is_empty() {
            String::new()
        } else {
            format!(" [{}]", candidate.unit.related_files.join(", "))
        };
        lines.push(format!(
            "{}. ({}) {}{files} — score {:.3}, via {}",
            i + 1,
            candidate.unit.kind,
            candidate.unit.intent,
            candidate.score,
            methods.join("+"),
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::in_memory(CortexConfig::default())
    }

    #[tokio::test]
    async fn store_then_recall_round_trip() {
        let mut engine = engine();
        let stored = engine
            .store_memory(
                "CONVENTION",
                "Always use Zod for schema validation in this project. Never use Joi or manual validation.",
                None,
                vec![],
                vec![],
            )
            .unwrap();
        assert!(stored.starts_with("Stored memory"));

        let recalled = engine
            .recall("user signup schema validation", None, None)
            .await
            .unwrap();
        assert!(recalled.contains("zod"), "recall output: {recalled}");
    }

    #[tokio::test]
    async fn recall_cache_serves_identical_queries() {
        let mut engine = engine();
        engine
            .store_memory(
                "DECISION",
                "the billing worker batches invoices every five minutes",
                None,
                vec![],
                vec![],
            )
            .unwrap();

        let first = engine.recall("billing invoices", Some(5), None).await.unwrap();
        let second = engine.recall("billing invoices", Some(5), None).await.unwrap();
        assert_eq!(first, second);

        // access_count was bumped only by the uncached pass
        let store = engine.store.as_ref().unwrap();
        let unit = &store.get_active(1).unwrap()[0];
        assert_eq!(unit.access_count, 1);
    }

    #[tokio::test]
    async fn long_queries_are_rejected() {
        let mut engine = engine();
        let long = "q".repeat(1001);
        assert!(engine.recall(&long, None, None).await.is_err());
    }

    #[test]
    fn oversized_content_is_rejected_at_the_boundary() {
        let mut engine = engine();
        let long = "meaningful words here ".repeat(250); // > 5000 chars
        let err = engine
            .store_memory("INSIGHT", &long, None, vec![], vec![])
            .unwrap_err();
        assert!(err.contains("5000"));
    }

    #[test]
    fn quality_gate_reason_is_surfaced() {
        let mut engine = engine();
        let err = engine
            .store_memory("INSIGHT", "too short", None, vec![], vec![])
            .unwrap_err();
        assert!(err.starts_with("rejected:"), "got: {err}");
    }

    #[test]
    fn contradiction_note_appears_in_store_response() {
        let mut engine = engine();
        engine
            .store_memory("CORRECTION", "Always use const, never var", None, vec![], vec![])
            .unwrap();
        let second = engine
            .store_memory("CORRECTION", "Always use var, never const", None, vec![], vec![])
            .unwrap();
        assert!(
            second.contains("Superseded conflicting memory"),
            "got: {second}"
        );
    }

    #[test]
    fn dedup_reports_the_existing_id() {
        let mut engine = engine();
        let first = engine
            .store_memory(
                "CONVENTION",
                "Always use functional components in React",
                None,
                vec![],
                vec![],
            )
            .unwrap();
        let second = engine
            .store_memory(
                "CONVENTION",
                "Always use functional components in React apps",
                None,
                vec![],
                vec![],
            )
            .unwrap();

        let id_of = |s: &str| s.split_whitespace().nth(2).unwrap().to_string();
        assert!(second.starts_with("Reinforced existing"));
        assert_eq!(id_of(&first), id_of(&second));
    }

    #[test]
    fn store_rate_limit_enforced() {
        let mut cfg = CortexConfig::default();
        cfg.limits.max_store_calls = 2;
        let mut engine = Engine::in_memory(cfg);

        for i in 0..2 {
            engine
                .store_memory(
                    "INSIGHT",
                    &format!("observation number{i} about the deploy pipeline"),
                    None,
                    vec![],
                    vec![],
                )
                .unwrap();
        }
        let err = engine
            .store_memory("INSIGHT", "one observation too many for this session", None, vec![], vec![])
            .unwrap_err();
        assert!(err.contains("budget exhausted"));
    }

    #[test]
    fn update_creates_replacement_with_edge() {
        let mut engine = engine();
        engine
            .store_memory("DECISION", "retries use exponential backoff", None, vec![], vec![])
            .unwrap();
        let original_id = engine
            .store
            .as_ref()
            .unwrap()
            .get_active(1)
            .unwrap()[0]
            .id
            .clone();

        engine
            .update_memory(
                &original_id,
                "retries use exponential backoff with full jitter",
                None,
            )
            .unwrap();

        let store = engine.store.as_ref().unwrap();
        let original = store.get(&original_id).unwrap().unwrap();
        assert!(!original.is_active);
        let replacement_id = original.superseded_by.clone().unwrap();
        assert!(store.get(&replacement_id).unwrap().unwrap().is_active);

        let edges = store.edges_from(&original_id).unwrap();
        assert!(edges
            .iter()
            .any(|e| e.relation == EdgeRelation::SupersededBy && e.target_id == replacement_id));
    }

    #[test]
    fn delete_is_soft_and_not_found_is_an_error() {
        let mut engine = engine();
        assert!(engine.delete_memory("missing-id", None).is_err());

        engine
            .store_memory("INSIGHT", "ephemeral observation to delete soon", None, vec![], vec![])
            .unwrap();
        let id = engine.store.as_ref().unwrap().get_active(1).unwrap()[0]
            .id
            .clone();

        engine.delete_memory(&id, Some("test")).unwrap();
        let unit = engine.store.as_ref().unwrap().get(&id).unwrap().unwrap();
        assert!(!unit.is_active);
    }

    #[test]
    fn auto_learn_extracts_imperative_sentences() {
        let mut engine = engine();
        let report = engine
            .auto_learn(
                "We talked about the release. Always tag releases before deploying. \
                 The weather was nice. Never deploy on fridays without a rollback plan.",
                Some("release-process"),
            )
            .unwrap();
        assert!(report.contains("Learned 2"), "got: {report}");
    }

    #[tokio::test]
    async fn force_recall_produces_context() {
        let mut engine = engine();
        engine
            .store_memory("CORRECTION", "actually the cache ttl is sixty seconds", None, vec![], vec![])
            .unwrap();
        let context = engine.force_recall("cache tuning", None).await.unwrap();
        assert!(context.starts_with("# memory context: cache tuning"));
        assert!(context.contains("mode: coding"));
    }

    #[test]
    fn export_import_round_trip_through_tool_surface() {
        let mut engine = engine();
        engine
            .store_memory("DEPENDENCY", "tokio stays pinned to the one dot forty line", None, vec![], vec![])
            .unwrap();
        let bundle_json = engine.export_memories().unwrap();

        let mut other = Engine::in_memory(CortexConfig::default());
        let report = other.import_memories(&bundle_json).unwrap();
        assert!(report.contains("Imported 1"));

        let again = other.import_memories(&bundle_json).unwrap();
        assert!(again.contains("Imported 0"));
    }

    #[test]
    fn health_check_reports_ok_state() {
        let mut engine = engine();
        let health = engine.health_check().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&health).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["embedder"]["provider"], "hashed");
        assert_eq!(parsed["database"]["integrity_ok"], true);
    }

    #[test]
    fn call_budget_exhaustion_is_a_result_error() {
        let mut cfg = CortexConfig::default();
        cfg.limits.max_total_calls = 1;
        let mut engine = Engine::in_memory(cfg);
        assert!(engine.admit_call().is_ok());
        assert!(engine.admit_call().is_err());
    }

    #[test]
    fn derive_intent_prefers_the_first_substantial_sentence() {
        let intent = derive_intent(
            "Always use Zod for schema validation in this project. Never use Joi or manual validation.",
        );
        assert_eq!(intent, "Always use Zod for schema validation in this project");

        let long = "word ".repeat(100);
        assert!(derive_intent(&long).chars().count() <= 300);
    }

    #[test]
    fn classification_keys_on_markers() {
        assert_eq!(
            classify_text("actually the port is 5433"),
            MemoryKind::Correction
        );
        assert_eq!(
            classify_text("fixed the crash in the uploader"),
            MemoryKind::BugFix
        );
        assert_eq!(
            classify_text("always run migrations in ci"),
            MemoryKind::Convention
        );
        assert_eq!(
            classify_text("we decided on postgres"),
            MemoryKind::Decision
        );
        assert_eq!(
            classify_text("the scheduler drifts overnight"),
            MemoryKind::Insight
        );
    }
}
