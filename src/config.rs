//! Cache configuration (loaded from a TOML file).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generation::EvictionStrategy;

/// Default entry-count threshold for run-boundary eviction.
pub const DEFAULT_EVICTION_THRESHOLD: usize = 1000;

/// Tunables for the kernel cache.
///
/// ```toml
/// [cache]
/// eviction_threshold = 1000
/// eviction_strategy = "coarse"   # coarse or generational
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry count above which a run boundary triggers eviction.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: usize,

    /// Eviction behavior at run boundaries.
    #[serde(default)]
    pub eviction_strategy: EvictionStrategy,
}

fn default_eviction_threshold() -> usize {
    DEFAULT_EVICTION_THRESHOLD
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            eviction_strategy: EvictionStrategy::default(),
        }
    }
}

/// File-level wrapper so the settings live under a `[cache]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: Option<CacheConfig>,
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(file.cache.unwrap_or_default())
    }

    /// Apply `GEOMCACHE_EVICTION_THRESHOLD` / `GEOMCACHE_EVICTION_STRATEGY`
    /// environment overrides on top of the loaded values.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("GEOMCACHE_EVICTION_THRESHOLD") {
            self.eviction_threshold = raw
                .parse()
                .context("Invalid GEOMCACHE_EVICTION_THRESHOLD")?;
        }
        if let Ok(raw) = std::env::var("GEOMCACHE_EVICTION_STRATEGY") {
            self.eviction_strategy = raw.parse()?;
        }
        Ok(self)
    }
}
