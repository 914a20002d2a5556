use anyhow::{Context, Result};
use std::path::Path;

use crate::config::CortexConfig;
use crate::memory::export::{import_bundle, Bundle};

/// Import a bundle file into the store.
pub fn import(config: &CortexConfig, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let bundle: Bundle =
        serde_json::from_str(&contents).context("failed to parse bundle JSON")?;

    let mut store = super::open_store(config)?;
    let report = import_bundle(&mut store, &bundle)?;
    store.checkpoint()?;
    println!(
        "Imported {} memories ({} skipped, {} errors).",
        report.imported, report.skipped, report.errors
    );
    Ok(())
}
