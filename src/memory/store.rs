//! Write and read paths for the item store.
//!
//! [`MemoryStore`] owns the database connection and the in-memory vector
//! table. The write path runs the dedup check before persistence (a near
//! duplicate is touched and returned, never re-inserted), the FTS mirror is
//! maintained by triggers, and vectors arrive later over the async embedding
//! path — an item without a vector is still reachable through FTS.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db;
use crate::memory::text;
use crate::memory::types::{Edge, EdgeRelation, Event, MemoryKind, MemoryUnit, NewMemory};

/// Hard field bounds enforced at the item layer.
const MAX_INTENT_CHARS: usize = 300;
const MAX_ACTION_CHARS: usize = 500;
const MAX_RELATED_FILES: usize = 20;

/// Outcome of an `add` call.
#[derive(Debug)]
pub struct AddOutcome {
    pub unit: MemoryUnit,
    /// `true` if an existing near-duplicate was touched instead of inserting.
    pub deduplicated: bool,
}

/// Field replacements for `update`. `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct UpdateFields {
    pub intent: Option<String>,
    pub action: Option<String>,
    pub reason: Option<String>,
    pub impact: Option<String>,
    pub outcome: Option<String>,
    pub related_files: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
}

/// The durable item store plus its in-memory vector sidecar.
#[derive(Debug)]
pub struct MemoryStore {
    conn: Connection,
    vectors: HashMap<String, Vec<f32>>,
    /// Jaccard threshold for the (kind, intent) dedup rule.
    dedup_threshold: f64,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MemoryStore {
    /// Open the store at a database path, creating parent directories and
    /// loading the vector sidecar into memory.
    pub fn open(path: impl AsRef<Path>, dedup_threshold: f64) -> Result<Self> {
        let conn = db::open_database(path)?;
        Self::from_connection(conn, dedup_threshold)
    }

    /// Open a fresh in-memory store (tests and tooling).
    pub fn open_in_memory(dedup_threshold: f64) -> Result<Self> {
        let conn = db::open_memory_database()?;
        Self::from_connection(conn, dedup_threshold)
    }

    pub fn from_connection(conn: Connection, dedup_threshold: f64) -> Result<Self> {
        let vectors = load_vectors(&conn)?;
        Ok(Self {
            conn,
            vectors,
            dedup_threshold,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Insert a new item, or touch and return an existing near-duplicate.
    pub fn add(&mut self, draft: NewMemory) -> Result<AddOutcome> {
        let kind = draft.kind.context("memory kind is required")?;
        let intent = text::normalize_intent(&draft.intent);
        if intent.is_empty() {
            bail!("intent must not be empty");
        }
        if intent.chars().count() > MAX_INTENT_CHARS {
            bail!(
                "intent exceeds {MAX_INTENT_CHARS} chars ({})",
                intent.chars().count()
            );
        }
        if draft.action.chars().count() > MAX_ACTION_CHARS {
            bail!(
                "action exceeds {MAX_ACTION_CHARS} chars ({})",
                draft.action.chars().count()
            );
        }
        if draft.related_files.len() > MAX_RELATED_FILES {
            bail!("related_files exceeds {MAX_RELATED_FILES} entries");
        }

        // Dedup, not reject: same kind + similar intent → reinforce the original.
        if let Some(existing) = self.find_duplicate(kind, &intent)? {
            self.touch(&existing)?;
            self.log_feedback(
                "dedup",
                Some(&existing),
                Some(&serde_json::json!({ "incoming_intent": intent })),
            )?;
            let unit = self
                .get(&existing)?
                .context("dedup target vanished mid-transaction")?;
            return Ok(AddOutcome {
                unit,
                deduplicated: true,
            });
        }

        let now = now_ms();
        let id = uuid::Uuid::now_v7().to_string();
        let timestamp = draft.timestamp.unwrap_or(now);
        let confidence = draft.confidence.unwrap_or(0.7).clamp(0.0, 1.0);
        let importance = draft.importance.unwrap_or(0.5).clamp(0.1, 1.0);
        let tags = sanitize_tags(&draft.tags);
        let outcome = draft
            .outcome
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        self.conn.execute(
            "INSERT INTO memory_units (id, kind, intent, action, reason, impact, outcome, \
             related_files, tags, created_at, timestamp, confidence, importance, \
             access_count, last_accessed, is_active, superseded_by, source_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, NULL, 1, NULL, ?14)",
            params![
                id,
                kind.as_str(),
                intent,
                draft.action,
                draft.reason,
                draft.impact,
                outcome,
                serde_json::to_string(&draft.related_files)?,
                serde_json::to_string(&tags)?,
                now,
                timestamp,
                confidence,
                importance,
                draft.source_event_id,
            ],
        )?;

        let unit = self.get(&id)?.context("inserted item not readable")?;
        Ok(AddOutcome {
            unit,
            deduplicated: false,
        })
    }

    /// Find an active item of the same kind whose intent clears the Jaccard
    /// dedup threshold. Returns the best match above the bar.
    ///
    /// Intents with differing negation profiles are never duplicates, even at
    /// full token overlap — "never var" and "never const" are opposites that
    /// contradiction detection must see as two items.
    fn find_duplicate(&self, kind: MemoryKind, intent: &str) -> Result<Option<String>> {
        let incoming = text::token_set(intent);
        if incoming.is_empty() {
            return Ok(None);
        }
        let incoming_negated = crate::memory::contradiction::negated_terms(intent);

        let mut stmt = self.conn.prepare(
            "SELECT id, intent FROM memory_units WHERE is_active = 1 AND kind = ?1",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut best: Option<(String, f64)> = None;
        for (id, existing_intent) in rows {
            let sim = text::jaccard(&incoming, &text::token_set(&existing_intent));
            if sim < self.dedup_threshold {
                continue;
            }
            if crate::memory::contradiction::negated_terms(&existing_intent) != incoming_negated {
                continue;
            }
            if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                best = Some((id, sim));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    /// Replace provided fields on an active item. No-op if the id is unknown
    /// or the item is inactive.
    pub fn update(&mut self, id: &str, fields: UpdateFields) -> Result<()> {
        let Some(current) = self.get(id)? else {
            return Ok(());
        };
        if !current.is_active {
            return Ok(());
        }

        let intent = fields
            .intent
            .map(|i| text::normalize_intent(&i))
            .unwrap_or(current.intent);
        let tags = fields
            .tags
            .map(|t| sanitize_tags(&t))
            .unwrap_or(current.tags);

        self.conn.execute(
            "UPDATE memory_units SET intent = ?1, action = ?2, reason = ?3, impact = ?4, \
             outcome = ?5, related_files = ?6, tags = ?7, confidence = ?8, importance = ?9 \
             WHERE id = ?10",
            params![
                intent,
                fields.action.unwrap_or(current.action),
                fields.reason.or(current.reason),
                fields.impact.or(current.impact),
                fields.outcome.unwrap_or(current.outcome),
                serde_json::to_string(&fields.related_files.unwrap_or(current.related_files))?,
                serde_json::to_string(&tags)?,
                fields.confidence.unwrap_or(current.confidence).clamp(0.0, 1.0),
                fields.importance.unwrap_or(current.importance).clamp(0.1, 1.0),
                id,
            ],
        )?;
        Ok(())
    }

    /// Soft-delete. Idempotent: the second call is a no-op.
    pub fn deactivate(&mut self, id: &str, superseded_by: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE memory_units SET is_active = 0, superseded_by = COALESCE(?1, superseded_by) \
             WHERE id = ?2 AND is_active = 1",
            params![superseded_by, id],
        )?;
        Ok(())
    }

    /// Reinforcement: bump access count, stamp last access.
    pub fn touch(&mut self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE memory_units SET access_count = access_count + 1, last_accessed = ?1 \
             WHERE id = ?2",
            params![now_ms(), id],
        )?;
        Ok(())
    }

    /// Persist a recomputed importance (aging).
    pub fn set_importance(&mut self, id: &str, importance: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE memory_units SET importance = ?1 WHERE id = ?2",
            params![importance.clamp(0.1, 1.0), id],
        )?;
        Ok(())
    }

    // ── Read path ────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Option<MemoryUnit>> {
        let unit = self
            .conn
            .query_row(
                &format!("SELECT {UNIT_COLUMNS} FROM memory_units WHERE id = ?1"),
                params![id],
                row_to_unit,
            )
            .optional()?;
        Ok(unit)
    }

    pub fn get_active(&self, limit: usize) -> Result<Vec<MemoryUnit>> {
        self.query_units(
            &format!(
                "SELECT {UNIT_COLUMNS} FROM memory_units WHERE is_active = 1 \
                 ORDER BY timestamp DESC, id LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    pub fn get_by_kind(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryUnit>> {
        self.query_units(
            &format!(
                "SELECT {UNIT_COLUMNS} FROM memory_units WHERE is_active = 1 AND kind = ?1 \
                 ORDER BY timestamp DESC, id LIMIT ?2"
            ),
            params![kind.as_str(), limit as i64],
        )
    }

    /// Items whose related_files mention `path` (substring match either way,
    /// verified in Rust after a coarse SQL prefilter).
    pub fn get_by_file(&self, path: &str, limit: usize) -> Result<Vec<MemoryUnit>> {
        let candidates = self.query_units(
            &format!(
                "SELECT {UNIT_COLUMNS} FROM memory_units WHERE is_active = 1 \
                 AND related_files != '[]' ORDER BY timestamp DESC, id"
            ),
            params![],
        )?;
        Ok(candidates
            .into_iter()
            .filter(|u| {
                u.related_files
                    .iter()
                    .any(|f| f.contains(path) || path.contains(f.as_str()))
            })
            .take(limit)
            .collect())
    }

    /// Keyword search over the FTS index. The caller may pass a pre-expanded
    /// OR-query. FTS rank is smaller-is-better; it is negated here so larger
    /// scores win downstream.
    pub fn search_fts(&self, match_query: &str, limit: usize) -> Result<Vec<(MemoryUnit, f64)>> {
        if match_query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {}, f.rank FROM memory_fts f \
             JOIN memory_units m ON m.rowid = f.rowid \
             WHERE memory_fts MATCH ?1 AND m.is_active = 1 \
             ORDER BY f.rank LIMIT ?2",
            unit_columns_prefixed("m")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![match_query, limit as i64], |row| {
                let unit = row_to_unit(row)?;
                let rank: f64 = row.get(18)?;
                Ok((unit, -rank))
            })
            .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(rows) => Ok(rows),
            // A malformed MATCH expression is a caller input problem, not a
            // store failure — treat it as zero hits.
            Err(rusqlite::Error::SqliteFailure(_, _)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Brute-force cosine over the in-memory vector table. Unit vectors make
    /// cosine a plain dot product; items missing a vector are absent.
    pub fn search_vector(&self, query: &[f32], limit: usize) -> Result<Vec<(MemoryUnit, f64)>> {
        if query.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let active: HashMap<String, (i64, String)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, timestamp FROM memory_units WHERE is_active = 1")?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let ts: i64 = row.get(1)?;
                    Ok((id.clone(), (ts, id)))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            rows
        };

        let mut scored: Vec<(String, f64, i64)> = self
            .vectors
            .iter()
            .filter_map(|(id, vec)| {
                active.get(id).map(|(ts, _)| (id.clone(), cosine(query, vec), *ts))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score, _) in scored {
            if let Some(unit) = self.get(&id)? {
                results.push((unit, score));
            }
        }
        Ok(results)
    }

    // ── Vector sidecar ───────────────────────────────────────────────────────

    /// Persist an embedding and mirror it in memory. Arrives asynchronously
    /// after the owning item was stored.
    pub fn put_vector(&mut self, id: &str, embedding: &[f32]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO memory_vectors (id, embedding, dim, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                vector_to_bytes(embedding),
                embedding.len() as i64,
                now_ms()
            ],
        )?;
        self.vectors.insert(id.to_string(), embedding.to_vec());
        Ok(())
    }

    pub fn has_vector(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    // ── Edges ────────────────────────────────────────────────────────────────

    /// Insert an edge. Idempotent on the (source, target, relation) triple.
    pub fn add_edge(&mut self, edge: &Edge) -> Result<()> {
        self.conn.execute(
            "INSERT INTO edges (source_id, target_id, relation, weight, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(source_id, target_id, relation) DO NOTHING",
            params![
                edge.source_id,
                edge.target_id,
                edge.relation.as_str(),
                edge.weight.clamp(0.0, 1.0),
                edge.timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn edges_from(&self, id: &str) -> Result<Vec<Edge>> {
        self.query_edges("SELECT source_id, target_id, relation, weight, timestamp \
             FROM edges WHERE source_id = ?1 ORDER BY timestamp DESC", id)
    }

    pub fn edges_to(&self, id: &str) -> Result<Vec<Edge>> {
        self.query_edges("SELECT source_id, target_id, relation, weight, timestamp \
             FROM edges WHERE target_id = ?1 ORDER BY timestamp DESC", id)
    }

    fn query_edges(&self, sql: &str, id: &str) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![id], |row| {
                let relation: String = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    relation,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(source_id, target_id, relation, weight, timestamp)| {
                relation.parse().ok().map(|relation| Edge {
                    source_id,
                    target_id,
                    relation,
                    weight,
                    timestamp,
                })
            })
            .collect())
    }

    /// Bounded breadth-first walk over the edge graph in both directions.
    /// Paths are acyclic (a visited set prevents revisits) and only active
    /// items are returned. Neighbour score downstream is `1 / (depth + 1)`.
    pub fn get_related(
        &self,
        id: &str,
        max_hops: usize,
        limit: usize,
    ) -> Result<Vec<(MemoryUnit, usize)>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(id.to_string());

        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((id.to_string(), 0));

        let mut results: Vec<(MemoryUnit, usize)> = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops || results.len() >= limit {
                continue;
            }

            let mut neighbours: Vec<String> = Vec::new();
            for edge in self.edges_from(&current)? {
                neighbours.push(edge.target_id);
            }
            for edge in self.edges_to(&current)? {
                neighbours.push(edge.source_id);
            }

            for neighbour in neighbours {
                if !visited.insert(neighbour.clone()) {
                    continue;
                }
                if let Some(unit) = self.get(&neighbour)? {
                    if unit.is_active {
                        results.push((unit, depth + 1));
                        if results.len() >= limit {
                            break;
                        }
                    }
                }
                queue.push_back((neighbour, depth + 1));
            }
        }

        Ok(results)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Append a raw input event. Returns the event id.
    pub fn record_event(
        &mut self,
        event_type: &str,
        source: &str,
        content: &str,
        file: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO events (event_type, source, content, file, metadata, timestamp, processed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                event_type,
                source,
                content,
                file,
                metadata.map(|m| m.to_string()),
                now_ms(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_event_processed(&mut self, event_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE events SET processed = 1 WHERE id = ?1",
            params![event_id],
        )?;
        Ok(())
    }

    /// Events still waiting for a processing pass, oldest first.
    pub fn unprocessed_events(&self, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, source, content, diff, file, metadata, timestamp, processed \
             FROM events WHERE processed = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let metadata_str: Option<String> = row.get(6)?;
                Ok(Event {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    source: row.get(2)?,
                    content: row.get(3)?,
                    diff: row.get(4)?,
                    file: row.get(5)?,
                    metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
                    timestamp: row.get(7)?,
                    processed: row.get::<_, i64>(8)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Bookkeeping tables ───────────────────────────────────────────────────

    pub fn log_feedback(
        &mut self,
        kind: &str,
        memory_id: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO feedback_log (kind, memory_id, details, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![kind, memory_id, details.map(|d| d.to_string()), now_ms()],
        )?;
        Ok(())
    }

    pub fn record_signal(&mut self, signal: &str, value: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_signals (signal, value, timestamp) VALUES (?1, ?2, ?3)",
            params![signal, value, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_adaptive(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM adaptive_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_adaptive(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO adaptive_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_identity(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM identity WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_identity(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO identity (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Close any dangling sessions and open a new one keyed on the topic.
    pub fn open_session(&mut self, topic: &str) -> Result<i64> {
        let now = now_ms();
        self.conn.execute(
            "UPDATE daily_summaries SET closed_at = ?1 WHERE closed_at IS NULL",
            params![now],
        )?;
        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO daily_summaries (day, topic, opened_at, closed_at, item_count) \
             VALUES (?1, ?2, ?3, NULL, 0)",
            params![day, topic, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent session headers: (day, topic, opened_at).
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<(String, String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT day, topic, opened_at FROM daily_summaries \
             ORDER BY opened_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Counters & maintenance ───────────────────────────────────────────────

    pub fn active_count(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM memory_units WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn total_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM memory_units", [], |row| row.get(0))?)
    }

    /// Rebuild the FTS index from the content table.
    pub fn rebuild_index(&mut self) -> Result<()> {
        self.conn
            .execute("INSERT INTO memory_fts(memory_fts) VALUES('rebuild')", [])?;
        Ok(())
    }

    /// Flush WAL; called on clean shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        db::checkpoint(&self.conn)
    }

    fn query_units(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MemoryUnit>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_unit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────────

const UNIT_COLUMNS: &str = "id, kind, intent, action, reason, impact, outcome, related_files, \
     tags, created_at, timestamp, confidence, importance, access_count, last_accessed, \
     is_active, superseded_by, source_event_id";

fn unit_columns_prefixed(alias: &str) -> String {
    UNIT_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryUnit> {
    let kind_str: String = row.get(1)?;
    let related_files_json: String = row.get(7)?;
    let tags_json: String = row.get(8)?;
    Ok(MemoryUnit {
        id: row.get(0)?,
        kind: kind_str
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        intent: row.get(2)?,
        action: row.get(3)?,
        reason: row.get(4)?,
        impact: row.get(5)?,
        outcome: row.get(6)?,
        related_files: serde_json::from_str(&related_files_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get(9)?,
        timestamp: row.get(10)?,
        confidence: row.get(11)?,
        importance: row.get(12)?,
        access_count: row.get(13)?,
        last_accessed: row.get(14)?,
        is_active: row.get::<_, i64>(15)? != 0,
        superseded_by: row.get(16)?,
        source_event_id: row.get(17)?,
    })
}

/// Keep tags lowercase and restricted to letters/digits/hyphen/colon.
fn sanitize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| {
            t.to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
                .collect::<String>()
        })
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Cosine similarity. Inputs are unit vectors so this is a dot product; a
/// zero-magnitude side yields 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)) as f64
}

fn vector_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect()
}

fn load_vectors(conn: &Connection) -> Result<HashMap<String, Vec<f32>>> {
    let mut stmt = conn.prepare("SELECT id, embedding FROM memory_vectors")?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((id, bytes_to_vector(&bytes)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MemoryStore {
        MemoryStore::open_in_memory(0.7).unwrap()
    }

    fn unit_vec(spike: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[spike % 384] = 1.0;
        v
    }

    #[test]
    fn add_and_get_round_trip() {
        let mut store = test_store();
        let outcome = store
            .add(NewMemory::new(
                MemoryKind::Decision,
                "Use SQLite with WAL for the persistence layer",
            ))
            .unwrap();
        assert!(!outcome.deduplicated);

        let fetched = store.get(&outcome.unit.id).unwrap().unwrap();
        assert_eq!(fetched.kind, MemoryKind::Decision);
        assert_eq!(
            fetched.intent,
            "use sqlite with wal for the persistence layer"
        );
        assert_eq!(fetched.outcome, "unknown");
        assert!(fetched.is_active);
        assert_eq!(fetched.access_count, 0);
    }

    #[test]
    fn dedup_touches_and_returns_existing() {
        let mut store = test_store();
        let first = store
            .add(NewMemory::new(
                MemoryKind::Convention,
                "Always use functional components in React",
            ))
            .unwrap();

        let second = store
            .add(NewMemory::new(
                MemoryKind::Convention,
                "Always use functional components in React apps",
            ))
            .unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.unit.id, first.unit.id);
        assert_eq!(second.unit.access_count, 1);
        assert_eq!(store.active_count().unwrap(), 1);
    }

    #[test]
    fn dedup_is_scoped_to_kind() {
        let mut store = test_store();
        let first = store
            .add(NewMemory::new(
                MemoryKind::Convention,
                "Always use functional components in React",
            ))
            .unwrap();
        let second = store
            .add(NewMemory::new(
                MemoryKind::Decision,
                "Always use functional components in React apps",
            ))
            .unwrap();

        assert!(!second.deduplicated);
        assert_ne!(second.unit.id, first.unit.id);
        assert_eq!(store.active_count().unwrap(), 2);
    }

    #[test]
    fn add_rejects_oversized_fields() {
        let mut store = test_store();

        let long_intent = "token ".repeat(60); // > 300 chars
        assert!(store
            .add(NewMemory::new(MemoryKind::Insight, long_intent))
            .is_err());

        let mut draft = NewMemory::new(MemoryKind::Insight, "short enough intent here");
        draft.action = "a".repeat(501);
        assert!(store.add(draft).is_err());

        let mut draft = NewMemory::new(MemoryKind::Insight, "another short intent here");
        draft.related_files = (0..21).map(|i| format!("src/file_{i}.rs")).collect();
        assert!(store.add(draft).is_err());
    }

    #[test]
    fn deactivate_is_idempotent() {
        let mut store = test_store();
        let outcome = store
            .add(NewMemory::new(
                MemoryKind::Insight,
                "The build cache lives under target/debug",
            ))
            .unwrap();
        let id = outcome.unit.id;

        store.deactivate(&id, None).unwrap();
        assert_eq!(store.active_count().unwrap(), 0);

        store.deactivate(&id, Some("other-id")).unwrap();
        let unit = store.get(&id).unwrap().unwrap();
        assert!(!unit.is_active);
        // Second call did not overwrite superseded_by on an inactive row
        assert_eq!(unit.superseded_by, None);
        assert_eq!(store.total_count().unwrap(), 1);
    }

    #[test]
    fn update_ignores_unknown_and_inactive() {
        let mut store = test_store();
        store
            .update(
                "no-such-id",
                UpdateFields {
                    intent: Some("whatever".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = store
            .add(NewMemory::new(MemoryKind::Insight, "original intent text here"))
            .unwrap();
        let id = outcome.unit.id;
        store.deactivate(&id, None).unwrap();
        store
            .update(
                &id,
                UpdateFields {
                    intent: Some("replacement intent".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            store.get(&id).unwrap().unwrap().intent,
            "original intent text here"
        );
    }

    #[test]
    fn fts_search_finds_stemmed_terms() {
        let mut store = test_store();
        store
            .add(NewMemory::new(
                MemoryKind::Convention,
                "Always use Zod for schema validation in this project",
            ))
            .unwrap();

        let hits = store.search_fts("\"validation\"", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 > 0.0, "rank should be negated to positive");

        // Stemming: "validating" matches "validation"
        let hits = store.search_fts("\"validating\"", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn fts_excludes_inactive_items() {
        let mut store = test_store();
        let outcome = store
            .add(NewMemory::new(
                MemoryKind::Insight,
                "Webpack rebuild loops came from the symlinked packages",
            ))
            .unwrap();
        store.deactivate(&outcome.unit.id, None).unwrap();

        let hits = store.search_fts("\"webpack\"", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn fts_malformed_query_is_empty_not_error() {
        let store = test_store();
        let hits = store.search_fts("\"unbalanced", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn vector_search_ranks_by_cosine() {
        let mut store = test_store();
        let a = store
            .add(NewMemory::new(MemoryKind::Insight, "first item about caching"))
            .unwrap();
        let b = store
            .add(NewMemory::new(MemoryKind::Insight, "second item about routing"))
            .unwrap();
        store.put_vector(&a.unit.id, &unit_vec(0)).unwrap();
        store.put_vector(&b.unit.id, &unit_vec(7)).unwrap();

        let hits = store.search_vector(&unit_vec(0), 10).unwrap();
        assert_eq!(hits[0].0.id, a.unit.id);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!(hits[1].1.abs() < 1e-6);
    }

    #[test]
    fn vector_search_skips_unembedded_and_inactive() {
        let mut store = test_store();
        let embedded = store
            .add(NewMemory::new(MemoryKind::Insight, "embedded item stays findable"))
            .unwrap();
        let _bare = store
            .add(NewMemory::new(MemoryKind::Insight, "item without any vector yet"))
            .unwrap();
        let gone = store
            .add(NewMemory::new(MemoryKind::Insight, "deactivated embedded item"))
            .unwrap();

        store.put_vector(&embedded.unit.id, &unit_vec(0)).unwrap();
        store.put_vector(&gone.unit.id, &unit_vec(0)).unwrap();
        store.deactivate(&gone.unit.id, None).unwrap();

        let hits = store.search_vector(&unit_vec(0), 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|(u, _)| u.id.as_str()).collect();
        assert_eq!(ids, vec![embedded.unit.id.as_str()]);
    }

    #[test]
    fn zero_query_vector_yields_nothing() {
        let store = test_store();
        let hits = store.search_vector(&vec![0.0f32; 384], 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn edges_are_idempotent_and_survive_deactivation() {
        let mut store = test_store();
        let a = store
            .add(NewMemory::new(MemoryKind::Decision, "choose postgres over mysql"))
            .unwrap();
        let b = store
            .add(NewMemory::new(MemoryKind::Decision, "use pgbouncer for pooling"))
            .unwrap();

        let edge = Edge {
            source_id: a.unit.id.clone(),
            target_id: b.unit.id.clone(),
            relation: EdgeRelation::RelatedTo,
            weight: 0.8,
            timestamp: now_ms(),
        };
        store.add_edge(&edge).unwrap();
        store.add_edge(&edge).unwrap();

        assert_eq!(store.edges_from(&a.unit.id).unwrap().len(), 1);
        assert_eq!(store.edges_to(&b.unit.id).unwrap().len(), 1);

        store.deactivate(&a.unit.id, None).unwrap();
        assert_eq!(store.edges_from(&a.unit.id).unwrap().len(), 1);
    }

    #[test]
    fn get_related_walks_breadth_first_without_cycles() {
        let mut store = test_store();
        let ids: Vec<String> = [
            "alpha item for the graph walk",
            "beta item for the graph walk",
            "gamma item for the graph walk",
        ]
        .iter()
        .enumerate()
        .map(|(i, intent)| {
            store
                .add(NewMemory::new(
                    if i == 0 { MemoryKind::Decision } else { MemoryKind::Insight },
                    *intent,
                ))
                .unwrap()
                .unit
                .id
        })
        .collect();

        // alpha → beta → gamma, plus a back-edge gamma → alpha (cycle)
        for (src, dst) in [(0, 1), (1, 2), (2, 0)] {
            store
                .add_edge(&Edge {
                    source_id: ids[src].clone(),
                    target_id: ids[dst].clone(),
                    relation: EdgeRelation::RelatedTo,
                    weight: 1.0,
                    timestamp: now_ms(),
                })
                .unwrap();
        }

        let related = store.get_related(&ids[0], 2, 10).unwrap();
        let depths: HashMap<&str, usize> = related
            .iter()
            .map(|(u, d)| (u.id.as_str(), *d))
            .collect();

        assert_eq!(depths.get(ids[1].as_str()), Some(&1));
        // gamma reachable at depth 1 via the back-edge (undirected walk)
        assert!(depths.contains_key(ids[2].as_str()));
        // the origin never reappears
        assert!(!depths.contains_key(ids[0].as_str()));
    }

    #[test]
    fn events_are_append_only_with_processed_flip() {
        let mut store = test_store();
        let event_id = store
            .record_event("conversation", "mcp", "user corrected the auth flow", None, None)
            .unwrap();

        let pending = store.unprocessed_events(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, event_id);
        assert_eq!(pending[0].event_type, "conversation");
        assert!(!pending[0].processed);

        store.mark_event_processed(event_id).unwrap();
        assert!(store.unprocessed_events(10).unwrap().is_empty());
    }

    #[test]
    fn sessions_close_previous_on_open() {
        let mut store = test_store();
        store.open_session("auth refactor").unwrap();
        store.open_session("billing bug").unwrap();

        let open: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM daily_summaries WHERE closed_at IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(open, 1);

        let sessions = store.recent_sessions(3).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].1, "billing bug");
    }

    #[test]
    fn vectors_reload_from_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let id = {
            let mut store = MemoryStore::open(&path, 0.7).unwrap();
            let outcome = store
                .add(NewMemory::new(MemoryKind::Insight, "persisted vector survives reopen"))
                .unwrap();
            store.put_vector(&outcome.unit.id, &unit_vec(3)).unwrap();
            store.checkpoint().unwrap();
            outcome.unit.id
        };

        let store = MemoryStore::open(&path, 0.7).unwrap();
        assert!(store.has_vector(&id));
        assert_eq!(store.vector_count(), 1);
    }

    #[test]
    fn tags_are_sanitized() {
        let mut store = test_store();
        let mut draft = NewMemory::new(MemoryKind::Dependency, "tokio pinned at one dot forty");
        draft.tags = vec![
            "Deps".into(),
            "area:runtime".into(),
            "Bad Tag!".into(),
            "deps".into(),
        ];
        let outcome = store.add(draft).unwrap();
        assert_eq!(
            outcome.unit.tags,
            vec!["deps".to_string(), "area:runtime".into(), "badtag".into()]
        );
    }

    #[test]
    fn cosine_zero_magnitude_is_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rebuild_index_restores_fts_coherence() {
        let mut store = test_store();
        store
            .add(NewMemory::new(
                MemoryKind::Insight,
                "the scheduler drifts by two seconds overnight",
            ))
            .unwrap();

        store.rebuild_index().unwrap();

        let hits = store.search_fts("\"scheduler\"", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
