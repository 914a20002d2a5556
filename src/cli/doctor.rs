use anyhow::Result;

use crate::config::CortexConfig;
use crate::db;

/// Health report: integrity, schema version, counts, vector coverage.
pub fn doctor(config: &CortexConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = super::open_store(config)?;
    let report = db::check_database_health(store.connection())?;

    println!("database: {}", db_path.display());
    println!("schema version: {}", report.schema_version);
    println!(
        "embedding model: {}",
        report.embedding_model.as_deref().unwrap_or("(unset)")
    );
    println!(
        "integrity: {}",
        if report.integrity_ok {
            "ok".to_string()
        } else {
            report.integrity_details.clone()
        }
    );
    println!(
        "items: {} total, {} active",
        report.item_count, report.active_count
    );
    println!("edges: {}", report.edge_count);
    println!("events: {}", report.event_count);
    let pending = store.unprocessed_events(5)?;
    if !pending.is_empty() {
        println!("pending events:");
        for event in &pending {
            println!("  #{} {} ({})", event.id, event.event_type, event.source);
        }
    }
    println!(
        "vector coverage: {}/{} active items",
        report.vector_count, report.active_count
    );

    if !report.integrity_ok {
        anyhow::bail!("integrity check failed");
    }
    Ok(())
}
