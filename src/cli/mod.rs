//! Maintenance subcommands: export, import, stats, doctor.
//!
//! Thin wrappers over the store and bundle modules so operators can work
//! with the database without an MCP client attached.

pub mod doctor;
pub mod export;
pub mod import;
pub mod stats;

pub use doctor::doctor;
pub use export::export;
pub use import::import;
pub use stats::show_stats;

use anyhow::Result;

use crate::config::CortexConfig;
use crate::memory::store::MemoryStore;

/// Open the configured store; shared by every subcommand.
fn open_store(config: &CortexConfig) -> Result<MemoryStore> {
    MemoryStore::open(
        config.resolved_db_path(),
        config.ranking.dedup_threshold,
    )
}
