use anyhow::Result;

use crate::config::CortexConfig;
use crate::memory::stats;

/// Print store statistics as JSON.
pub fn show_stats(config: &CortexConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = super::open_store(config)?;
    let report = stats::collect(&store, Some(&db_path))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
