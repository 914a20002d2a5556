//! SQL DDL for all cortex tables.
//!
//! Defines the append-only `events` log, the `memory_units` item table, the
//! `memory_fts` FTS5 mirror (kept in sync by triggers), the `edges` graph,
//! the `memory_vectors` sidecar, and the auxiliary bookkeeping tables. All
//! DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Append-only raw input log
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    source TEXT NOT NULL,
    content TEXT NOT NULL,
    diff TEXT,
    file TEXT,
    metadata TEXT,
    timestamp INTEGER NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);

-- Core item storage
CREATE TABLE IF NOT EXISTS memory_units (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN (
        'correction','decision','convention','bug_fix',
        'insight','failed_suggestion','proven_pattern','dependency')),
    intent TEXT NOT NULL,
    action TEXT NOT NULL DEFAULT '',
    reason TEXT,
    impact TEXT,
    outcome TEXT NOT NULL DEFAULT 'unknown',
    related_files TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.7 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    importance REAL NOT NULL DEFAULT 0.5,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    superseded_by TEXT,
    source_event_id INTEGER REFERENCES events(id)
);

CREATE INDEX IF NOT EXISTS idx_units_active_ts ON memory_units(is_active, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_units_kind ON memory_units(kind) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_units_created ON memory_units(created_at);

-- Full-text index over the searchable fields, porter-stemmed.
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    intent, action, reason, impact, tags,
    content='memory_units',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Triggers keep the FTS mirror coherent with memory_units on every commit.
CREATE TRIGGER IF NOT EXISTS memory_units_ai AFTER INSERT ON memory_units BEGIN
    INSERT INTO memory_fts(rowid, intent, action, reason, impact, tags)
    VALUES (new.rowid, new.intent, new.action, new.reason, new.impact, new.tags);
END;

CREATE TRIGGER IF NOT EXISTS memory_units_ad AFTER DELETE ON memory_units BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, intent, action, reason, impact, tags)
    VALUES ('delete', old.rowid, old.intent, old.action, old.reason, old.impact, old.tags);
END;

CREATE TRIGGER IF NOT EXISTS memory_units_au AFTER UPDATE ON memory_units BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, intent, action, reason, impact, tags)
    VALUES ('delete', old.rowid, old.intent, old.action, old.reason, old.impact, old.tags);
    INSERT INTO memory_fts(rowid, intent, action, reason, impact, tags)
    VALUES (new.rowid, new.intent, new.action, new.reason, new.impact, new.tags);
END;

-- Directed item graph
CREATE TABLE IF NOT EXISTS edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation TEXT NOT NULL CHECK(relation IN (
        'related_to','superseded_by','replaced_by','caused_by','contradicts')),
    weight REAL NOT NULL DEFAULT 1.0 CHECK(weight >= 0.0 AND weight <= 1.0),
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

-- Vector sidecar. Populated asynchronously; absence is not an error.
CREATE TABLE IF NOT EXISTS memory_vectors (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dim INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Retrieval/interaction signals (one row per recall-class call)
CREATE TABLE IF NOT EXISTS user_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal TEXT NOT NULL,
    value TEXT,
    timestamp INTEGER NOT NULL
);

-- Audit trail: dedup hits, supersessions, aging mutations
CREATE TABLE IF NOT EXISTS feedback_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    memory_id TEXT,
    details TEXT,
    timestamp INTEGER NOT NULL
);

-- Install/project identity
CREATE TABLE IF NOT EXISTS identity (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Session boundaries for context assembly
CREATE TABLE IF NOT EXISTS daily_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    day TEXT NOT NULL,
    topic TEXT NOT NULL,
    opened_at INTEGER NOT NULL,
    closed_at INTEGER,
    item_count INTEGER NOT NULL DEFAULT 0
);

-- Runtime tunables and scanner digests
CREATE TABLE IF NOT EXISTS adaptive_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_version (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (key, value) VALUES ('version', '1')",
        [],
    )?;

    Ok(())
}
