//! Versioned export/import bundles.
//!
//! The on-disk schema is an implementation detail; the bundle is the stable
//! interchange format. Export covers active items only. Import is idempotent:
//! exact `(type, lowercased-intent)` matches are skipped and per-record errors
//! are counted, never raised.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::memory::store::MemoryStore;
use crate::memory::text;
use crate::memory::types::NewMemory;

pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    #[serde(rename = "memoryCount")]
    pub memory_count: usize,
    pub memories: Vec<BundleMemory>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BundleMemory {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub intent: String,
    pub action: String,
    pub reason: Option<String>,
    pub tags: Vec<String>,
    #[serde(rename = "relatedFiles")]
    pub related_files: Vec<String>,
    pub confidence: f64,
    pub importance: f64,
    #[serde(rename = "accessCount")]
    pub access_count: u32,
    /// Epoch-ms.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// ISO-8601.
    pub timestamp: String,
}

/// Export the active set as a bundle.
pub fn export_bundle(store: &MemoryStore) -> Result<Bundle> {
    let active = store.get_active(usize::MAX / 2)?;
    let memories: Vec<BundleMemory> = active
        .into_iter()
        .map(|unit| BundleMemory {
            id: unit.id,
            kind: unit.kind.as_str().to_string(),
            intent: unit.intent,
            action: unit.action,
            reason: unit.reason,
            tags: unit.tags,
            related_files: unit.related_files,
            confidence: unit.confidence,
            importance: unit.importance,
            access_count: unit.access_count,
            created_at: unit.created_at,
            timestamp: chrono::DateTime::from_timestamp_millis(unit.timestamp)
                .unwrap_or_default()
                .to_rfc3339(),
        })
        .collect();

    Ok(Bundle {
        version: BUNDLE_VERSION,
        exported_at: chrono::Utc::now().to_rfc3339(),
        memory_count: memories.len(),
        memories,
    })
}

/// Per-record accounting for an import.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Import a bundle. Bundles of unknown version are rejected outright;
/// everything past that point degrades to per-record counting.
pub fn import_bundle(store: &mut MemoryStore, bundle: &Bundle) -> Result<ImportReport> {
    if bundle.version != BUNDLE_VERSION {
        bail!(
            "unsupported bundle version {} (expected {BUNDLE_VERSION})",
            bundle.version
        );
    }

    // Snapshot existing (kind, normalized-intent) pairs once.
    let existing: std::collections::HashSet<(String, String)> = store
        .get_active(usize::MAX / 2)?
        .into_iter()
        .map(|u| (u.kind.as_str().to_string(), text::normalize_intent(&u.intent)))
        .collect();

    let mut report = ImportReport::default();
    for record in &bundle.memories {
        let Ok(kind) = record.kind.parse() else {
            report.errors += 1;
            continue;
        };
        let key = (
            record.kind.to_lowercase(),
            text::normalize_intent(&record.intent),
        );
        if existing.contains(&key) {
            report.skipped += 1;
            continue;
        }

        let timestamp = chrono::DateTime::parse_from_rfc3339(&record.timestamp)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(record.created_at);

        let draft = NewMemory {
            kind: Some(kind),
            intent: record.intent.clone(),
            action: record.action.clone(),
            reason: record.reason.clone(),
            impact: None,
            outcome: None,
            related_files: record.related_files.clone(),
            tags: record.tags.clone(),
            timestamp: Some(timestamp),
            confidence: Some(record.confidence),
            importance: Some(record.importance),
            source_event_id: None,
        };

        match store.add(draft) {
            Ok(outcome) if outcome.deduplicated => report.skipped += 1,
            Ok(_) => report.imported += 1,
            Err(e) => {
                tracing::warn!(error = %e, intent = %record.intent, "import record failed");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryKind;

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::open_in_memory(0.7).unwrap();
        for (kind, intent) in [
            (MemoryKind::Convention, "use zod for every request schema"),
            (MemoryKind::Decision, "postgres is the primary database"),
            (MemoryKind::BugFix, "debounce the search box to stop request storms"),
        ] {
            store.add(NewMemory::new(kind, intent)).unwrap();
        }
        store
    }

    #[test]
    fn export_then_import_into_fresh_store_preserves_active_set() {
        let source = seeded_store();
        let bundle = export_bundle(&source).unwrap();
        assert_eq!(bundle.version, BUNDLE_VERSION);
        assert_eq!(bundle.memory_count, 3);

        let mut target = MemoryStore::open_in_memory(0.7).unwrap();
        let report = import_bundle(&mut target, &bundle).unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(target.active_count().unwrap(), 3);

        // Same (kind, intent) pairs on both sides
        let pairs = |s: &MemoryStore| {
            let mut v: Vec<(String, String)> = s
                .get_active(100)
                .unwrap()
                .into_iter()
                .map(|u| (u.kind.as_str().to_string(), u.intent))
                .collect();
            v.sort();
            v
        };
        assert_eq!(pairs(&source), pairs(&target));
    }

    #[test]
    fn second_import_skips_everything() {
        let source = seeded_store();
        let bundle = export_bundle(&source).unwrap();

        let mut target = MemoryStore::open_in_memory(0.7).unwrap();
        import_bundle(&mut target, &bundle).unwrap();
        let report = import_bundle(&mut target, &bundle).unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(target.active_count().unwrap(), 3);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bundle = Bundle {
            version: 9,
            exported_at: chrono::Utc::now().to_rfc3339(),
            memory_count: 0,
            memories: vec![],
        };
        let mut target = MemoryStore::open_in_memory(0.7).unwrap();
        assert!(import_bundle(&mut target, &bundle).is_err());
    }

    #[test]
    fn bad_records_are_counted_not_raised() {
        let bundle = Bundle {
            version: BUNDLE_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            memory_count: 2,
            memories: vec![
                BundleMemory {
                    id: "r1".into(),
                    kind: "not_a_kind".into(),
                    intent: "this record has an unknown kind".into(),
                    action: String::new(),
                    reason: None,
                    tags: vec![],
                    related_files: vec![],
                    confidence: 0.8,
                    importance: 0.5,
                    access_count: 0,
                    created_at: 0,
                    timestamp: "2026-01-01T00:00:00Z".into(),
                },
                BundleMemory {
                    id: "r2".into(),
                    kind: "insight".into(),
                    intent: "this record is perfectly valid".into(),
                    action: String::new(),
                    reason: None,
                    tags: vec![],
                    related_files: vec![],
                    confidence: 0.8,
                    importance: 0.5,
                    access_count: 0,
                    created_at: 0,
                    timestamp: "2026-01-01T00:00:00Z".into(),
                },
            ],
        };

        let mut target = MemoryStore::open_in_memory(0.7).unwrap();
        let report = import_bundle(&mut target, &bundle).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn export_excludes_inactive_items() {
        let mut store = seeded_store();
        let doomed = store.get_active(1).unwrap()[0].id.clone();
        store.deactivate(&doomed, None).unwrap();

        let bundle = export_bundle(&store).unwrap();
        assert_eq!(bundle.memory_count, 2);
        assert!(bundle.memories.iter().all(|m| m.id != doomed));
    }
}
