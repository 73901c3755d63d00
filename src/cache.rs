//! The cache state owned by one worker: handle store, generation tracker and
//! eviction settings, composed into a single value so independent instances
//! (one per worker, one per test) never share anything.

use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::fingerprint::Fingerprint;
use crate::generation::{EvictionStrategy, GenerationTracker};
use crate::store::{CacheEntry, HandleStore, StoreStats};

pub struct KernelCache {
    store: HandleStore,
    tracker: GenerationTracker,
    config: CacheConfig,
}

impl KernelCache {
    pub fn new(config: CacheConfig) -> Self {
        debug!(
            eviction_threshold = config.eviction_threshold,
            eviction_strategy = config.eviction_strategy.as_str(),
            "kernel cache initialized"
        );
        Self {
            store: HandleStore::new(),
            tracker: GenerationTracker::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Record a touch without reading or writing an entry.
    pub fn mark_used(&mut self, hash: Fingerprint) {
        self.tracker.mark_used(hash);
    }

    /// Look up an entry; a successful lookup counts as a touch.
    pub fn get(&mut self, hash: Fingerprint) -> Option<&CacheEntry> {
        if self.store.contains(hash) {
            self.tracker.mark_used(hash);
        }
        self.store.get(hash)
    }

    /// Look up without touching; used by assertions and diagnostics.
    pub fn peek(&self, hash: Fingerprint) -> Option<&CacheEntry> {
        self.store.get(hash)
    }

    pub fn contains(&self, hash: Fingerprint) -> bool {
        self.store.contains(hash)
    }

    /// Insert an entry; counts as a touch.
    pub fn put(&mut self, hash: Fingerprint, entry: CacheEntry) {
        self.store.put(hash, entry);
        self.tracker.mark_used(hash);
    }

    /// Release one entry. Missing entries and failing native releases are
    /// both fine; cleanup is idempotent.
    pub fn release(&mut self, hash: Fingerprint) {
        if self.store.release(hash) {
            debug!(fingerprint = %hash, "entry released");
        }
    }

    /// Release everything and forget all run tracking.
    pub fn release_all(&mut self) {
        let entry_count = self.store.release_all();
        self.tracker.clear();
        info!(entry_count, "cache cleared");
    }

    /// Run boundary. With the coarse strategy the store is flushed wholesale
    /// once it has grown past the threshold; otherwise only the current-run
    /// set resets. The generational strategy instead drops exactly the
    /// entries used in neither the completed nor the preceding run.
    pub fn on_run_start(&mut self) {
        match self.config.eviction_strategy {
            EvictionStrategy::Coarse => {
                if self.store.len() > self.config.eviction_threshold {
                    info!(
                        entry_count = self.store.len(),
                        threshold = self.config.eviction_threshold,
                        "run boundary: cache over threshold, flushing"
                    );
                    self.release_all();
                } else {
                    self.tracker.begin_run();
                }
            }
            EvictionStrategy::Generational => {
                let mut evicted = 0usize;
                for hash in self.store.hashes() {
                    if !self.tracker.is_live(hash) {
                        self.store.release(hash);
                        evicted += 1;
                    }
                }
                if evicted > 0 {
                    info!(evicted, "run boundary: generational eviction");
                }
                self.tracker.snapshot_previous();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tracker(&self) -> &GenerationTracker {
        &self.tracker
    }
}
