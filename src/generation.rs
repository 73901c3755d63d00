//! Run-to-run usage tracking.
//!
//! A "run" is one end-to-end execution of the orchestrating script. The
//! tracker records which fingerprints were touched in the current run and
//! keeps them rolled into the previous-run set as well, so that the instant a
//! new run begins the sets already reflect the run just completed. Eviction
//! itself is driven from [`crate::cache::KernelCache::on_run_start`].

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// How the cache evicts at a run boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Flush everything once the entry count exceeds the threshold. Trades
    /// peak memory for simplicity; the default.
    #[default]
    Coarse,
    /// Keep only entries used in the current or previous run.
    Generational,
}

impl FromStr for EvictionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "coarse" => Ok(Self::Coarse),
            "generational" => Ok(Self::Generational),
            _ => anyhow::bail!(
                "Invalid eviction strategy: {}. Must be coarse or generational",
                s
            ),
        }
    }
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coarse => "coarse",
            Self::Generational => "generational",
        }
    }
}

/// The two usage sets consulted at run boundaries.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    used_this_run: HashSet<Fingerprint>,
    used_previous_run: HashSet<Fingerprint>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a touch. The fingerprint lands in both sets so the
    /// previous-run view is already complete when the next run starts.
    pub fn mark_used(&mut self, hash: Fingerprint) {
        self.used_this_run.insert(hash);
        self.used_previous_run.insert(hash);
    }

    /// Start a new run: the current-run set empties, the previous-run set
    /// keeps everything the completed run touched.
    pub fn begin_run(&mut self) {
        self.used_this_run.clear();
    }

    /// Snapshot for precise generational eviction: the previous-run set
    /// becomes exactly the completed run's set.
    pub fn snapshot_previous(&mut self) {
        self.used_previous_run = std::mem::take(&mut self.used_this_run);
    }

    /// Whether `hash` was used in the current or previous run.
    pub fn is_live(&self, hash: Fingerprint) -> bool {
        self.used_this_run.contains(&hash) || self.used_previous_run.contains(&hash)
    }

    pub fn was_used_this_run(&self, hash: Fingerprint) -> bool {
        self.used_this_run.contains(&hash)
    }

    pub fn was_used_previous_run(&self, hash: Fingerprint) -> bool {
        self.used_previous_run.contains(&hash)
    }

    /// Forget everything; pairs with a full cache flush.
    pub fn clear(&mut self) {
        self.used_this_run.clear();
        self.used_previous_run.clear();
    }
}
