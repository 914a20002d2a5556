use anyhow::Result;
use rusqlite::params;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::memory::store::MemoryStore;
use crate::memory::types::MemoryKind;

/// Store statistics for the `get_stats` tool and the CLI.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub total_items: i64,
    pub active_items: i64,
    pub inactive_items: i64,
    pub by_kind: HashMap<String, i64>,
    pub edges: i64,
    pub events: i64,
    pub unprocessed_events: i64,
    pub vectors: usize,
    pub recall_signals: i64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_item_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_item_ts: Option<i64>,
}

/// Compute store statistics. `db_path` is used for file size; pass `None`
/// for in-memory databases.
pub fn collect(store: &MemoryStore, db_path: Option<&Path>) -> Result<StatsReport> {
    let conn = store.connection();

    let total_items = store.total_count()?;
    let active_items = store.active_count()?;

    let mut by_kind: HashMap<String, i64> = MemoryKind::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), 0))
        .collect();
    {
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM memory_units WHERE is_active = 1 GROUP BY kind",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (kind, count) in rows {
            by_kind.insert(kind, count);
        }
    }

    let scalar = |sql: &str| -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap_or(0)
    };

    let (oldest_item_ts, newest_item_ts) = conn
        .query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM memory_units WHERE is_active = 1",
            params![],
            |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .unwrap_or((None, None));

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsReport {
        total_items,
        active_items,
        inactive_items: total_items - active_items,
        by_kind,
        edges: scalar("SELECT COUNT(*) FROM edges"),
        events: scalar("SELECT COUNT(*) FROM events"),
        unprocessed_events: scalar("SELECT COUNT(*) FROM events WHERE processed = 0"),
        vectors: store.vector_count(),
        recall_signals: scalar("SELECT COUNT(*) FROM user_signals WHERE signal = 'recall'"),
        db_size_bytes,
        oldest_item_ts,
        newest_item_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::NewMemory;

    #[test]
    fn counts_reflect_store_contents() {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();
        store
            .add(NewMemory::new(
                MemoryKind::Correction,
                "actually the retry limit is three",
            ))
            .unwrap();
        let doomed = store
            .add(NewMemory::new(
                MemoryKind::Insight,
                "cold starts dominate p99 latency",
            ))
            .unwrap()
            .unit
            .id;
        store.deactivate(&doomed, None).unwrap();
        store.record_signal("recall", Some("latency")).unwrap();

        let report = collect(&store, None).unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.active_items, 1);
        assert_eq!(report.inactive_items, 1);
        assert_eq!(report.by_kind["correction"], 1);
        assert_eq!(report.by_kind["insight"], 0);
        assert_eq!(report.recall_signals, 1);
        assert_eq!(report.db_size_bytes, 0);
    }
}
