#![allow(dead_code)]

use cortex::config::CortexConfig;
use cortex::engine::Engine;
use cortex::memory::store::MemoryStore;
use cortex::memory::types::{MemoryKind, NewMemory};
use std::path::Path;

/// Fresh in-memory store with the default dedup threshold.
pub fn test_store() -> MemoryStore {
    MemoryStore::open_in_memory(0.7).unwrap()
}

/// Store bound to a database file (for reopen tests).
pub fn file_store(path: &Path) -> MemoryStore {
    MemoryStore::open(path, 0.7).unwrap()
}

/// Engine over an in-memory store with default config.
pub fn test_engine() -> Engine {
    Engine::in_memory(CortexConfig::default())
}

/// Engine bound to a database file.
pub fn file_engine(path: &Path) -> Engine {
    let mut cfg = CortexConfig::default();
    cfg.storage.db_path = path.to_string_lossy().into_owned();
    Engine::new(cfg)
}

/// Insert an item and return its id.
pub fn insert(store: &mut MemoryStore, kind: MemoryKind, intent: &str) -> String {
    store.add(NewMemory::new(kind, intent)).unwrap().unit.id
}

/// Deterministic 384-dim unit vector with a spike at `seed`.
pub fn spike_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 384];
    v[seed % 384] = 1.0;
    v
}

/// Backdate an item's timestamps by `days`.
pub fn backdate(store: &MemoryStore, id: &str, days: i64) {
    let ts = cortex::memory::store::now_ms() - days * 86_400_000;
    store
        .connection()
        .execute(
            "UPDATE memory_units SET timestamp = ?1, created_at = ?1 WHERE id = ?2",
            rusqlite::params![ts, id],
        )
        .unwrap();
}
