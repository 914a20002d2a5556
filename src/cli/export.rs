use anyhow::Result;

use crate::config::CortexConfig;
use crate::memory::export::export_bundle;

/// Print the active set as a bundle on stdout.
pub fn export(config: &CortexConfig) -> Result<()> {
    let store = super::open_store(config)?;
    let bundle = export_bundle(&store)?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    eprintln!("Exported {} memories.", bundle.memory_count);
    Ok(())
}
