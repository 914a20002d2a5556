use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CortexConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub ranking: RankingConfig,
    pub aging: AgingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    /// Dashboard port. Parsed for compatibility; this binary does not serve HTTP.
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Soft cap on active items; cleanup deactivates the least important past it.
    pub active_cap: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "auto" picks the local model when available, otherwise the hashing fallback.
    /// "local" requires model files; "hashed" forces the fallback.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub embed_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_max_results: usize,
    pub max_results_cap: usize,
    pub fts_weight: f64,
    pub vector_weight: f64,
    pub file_weight: f64,
    /// Maximum number of terms after synonym expansion.
    pub expansion_cap: usize,
    pub cache_entries: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RankingConfig {
    /// Jaccard threshold above which two same-kind intents are checked for negation.
    pub contradiction_threshold: f64,
    /// Jaccard threshold for treating two same-kind intents as duplicates.
    pub dedup_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgingConfig {
    pub decay_rate: f64,
    pub insight_stale_days: i64,
    pub stale_days: i64,
    pub consolidation_min_group: usize,
    pub consolidation_similarity: f64,
    /// Consolidation only runs once the active set is larger than this.
    pub consolidation_active_floor: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_store_calls: u32,
    pub max_auto_learn_calls: u32,
    pub max_total_calls: u32,
    pub git_timeout_secs: u64,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ranking: RankingConfig::default(),
            aging: AgingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            port: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./.ai/brain-data/data/cognitive.db".into(),
            active_cap: 500,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = dirs::home_dir()
            .map(|h| h.join(".cortex/models"))
            .unwrap_or_else(|| PathBuf::from(".cortex/models"))
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "auto".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            embed_timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            max_results_cap: 50,
            fts_weight: 0.35,
            vector_weight: 0.50,
            file_weight: 0.15,
            expansion_cap: 8,
            cache_entries: 50,
            cache_ttl_secs: 60,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            contradiction_threshold: 0.5,
            dedup_threshold: 0.7,
        }
    }
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.02,
            insight_stale_days: 14,
            stale_days: 30,
            consolidation_min_group: 3,
            consolidation_similarity: 0.5,
            consolidation_active_floor: 50,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_store_calls: 30,
            max_auto_learn_calls: 100,
            max_total_calls: 500,
            git_timeout_secs: 5,
        }
    }
}

/// Default config file path: `./.ai/brain-data/config.toml` in the workspace.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("./.ai/brain-data/config.toml")
}

impl CortexConfig {
    /// Load config from the workspace TOML file (if present), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CortexConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (CORTEX_DB, CORTEX_LOG_LEVEL, CORTEX_PORT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CORTEX_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CORTEX_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CORTEX_PORT") {
            self.server.port = val.parse().ok();
        }
    }

    /// True when CORTEX_DEBUG=1 — log lines are also appended to ./cortex.log.
    pub fn debug_log_enabled() -> bool {
        std::env::var("CORTEX_DEBUG").map(|v| v == "1").unwrap_or(false)
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
