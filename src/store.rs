//! Handle store: the map from fingerprint to cached kernel result.
//!
//! Every entry is one of four explicit shapes. A native handle is owned by
//! exactly one [`CacheEntry::Handle`]; group and composite entries hold only
//! the fingerprints of their members, which are registered as handle entries
//! of their own and released independently.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::kernel::HandleRef;

/// A live handle tagged with the fingerprint it is stored under, so the codec
/// can mint its transport token without re-deriving anything.
#[derive(Clone)]
pub struct TaggedHandle {
    pub hash: Fingerprint,
    pub handle: HandleRef,
}

impl fmt::Debug for TaggedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedHandle")
            .field("hash", &self.hash)
            .field("object_id", &self.handle.object_id())
            .finish()
    }
}

/// Fingerprints of the members of a list-shaped result, in result order.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub members: Vec<Fingerprint>,
}

/// Whole-object record of a composite result. The primary and each part are
/// registered under their own fingerprints; this entry only ties them back
/// together for whole-object cache hits.
#[derive(Debug, Clone)]
pub struct CompositeEntry {
    pub primary: Fingerprint,
    pub parts: Vec<(String, Fingerprint)>,
    pub payload: Value,
}

/// One cached result, keyed by the fingerprint that produced it.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Handle(TaggedHandle),
    Value(Value),
    Group(GroupEntry),
    Composite(CompositeEntry),
}

/// Entry counts by shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub handles: usize,
    pub plain_values: usize,
    pub groups: usize,
    pub composites: usize,
}

/// Map from fingerprint to cached entry.
#[derive(Default)]
pub struct HandleStore {
    entries: HashMap<Fingerprint, CacheEntry>,
}

impl HandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: Fingerprint) -> Option<&CacheEntry> {
        self.entries.get(&hash)
    }

    pub fn contains(&self, hash: Fingerprint) -> bool {
        self.entries.contains_key(&hash)
    }

    /// Insert or overwrite the entry for `hash`.
    pub fn put(&mut self, hash: Fingerprint, entry: CacheEntry) {
        self.entries.insert(hash, entry);
    }

    /// Release the entry for `hash` if present. Never fails: a missing entry
    /// is a no-op and a failing native release is logged and swallowed, so
    /// cleanup stays idempotent. Returns whether an entry was removed.
    pub fn release(&mut self, hash: Fingerprint) -> bool {
        match self.entries.remove(&hash) {
            Some(entry) => {
                Self::release_native(hash, &entry);
                true
            }
            None => false,
        }
    }

    /// Release every entry. Returns how many were removed.
    pub fn release_all(&mut self) -> usize {
        let count = self.entries.len();
        for (hash, entry) in self.entries.drain() {
            Self::release_native(hash, &entry);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hashes(&self) -> Vec<Fingerprint> {
        self.entries.keys().copied().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total_entries: self.entries.len(),
            ..StoreStats::default()
        };
        for entry in self.entries.values() {
            match entry {
                CacheEntry::Handle(_) => stats.handles += 1,
                CacheEntry::Value(_) => stats.plain_values += 1,
                CacheEntry::Group(_) => stats.groups += 1,
                CacheEntry::Composite(_) => stats.composites += 1,
            }
        }
        stats
    }

    fn release_native(hash: Fingerprint, entry: &CacheEntry) {
        if let CacheEntry::Handle(tagged) = entry {
            if let Err(error) = tagged.handle.release() {
                // The kernel may have invalidated the object already; the
                // entry is dropped regardless so the slot never leaks.
                debug!(
                    fingerprint = %hash,
                    object_id = tagged.handle.object_id(),
                    error = %error,
                    "native release failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use serde_json::json;

    use crate::kernel::KernelObject;

    struct StubShape {
        id: u64,
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl KernelObject for StubShape {
        fn object_id(&self) -> u64 {
            self.id
        }

        fn release(&self) -> anyhow::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                Err(anyhow!("object {} already freed", self.id))
            } else {
                Ok(())
            }
        }
    }

    fn handle_entry(hash: i32, releases: &Arc<AtomicUsize>, fail_release: bool) -> CacheEntry {
        CacheEntry::Handle(TaggedHandle {
            hash: Fingerprint(hash),
            handle: Arc::new(StubShape {
                id: hash as u64,
                releases: Arc::clone(releases),
                fail_release,
            }),
        })
    }

    #[test]
    fn test_put_get_overwrite() {
        let mut store = HandleStore::new();
        store.put(Fingerprint(1), CacheEntry::Value(json!("first")));
        store.put(Fingerprint(1), CacheEntry::Value(json!("second")));

        match store.get(Fingerprint(1)) {
            Some(CacheEntry::Value(value)) => assert_eq!(value, &json!("second")),
            other => panic!("unexpected entry: {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut store = HandleStore::new();
        store.put(Fingerprint(7), handle_entry(7, &releases, false));

        assert!(store.release(Fingerprint(7)));
        assert!(!store.release(Fingerprint(7)));
        assert!(!store.release(Fingerprint(99)));

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_swallows_native_failure() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut store = HandleStore::new();
        store.put(Fingerprint(3), handle_entry(3, &releases, true));

        // A failing native release still removes the entry.
        assert!(store.release(Fingerprint(3)));
        assert!(!store.contains(Fingerprint(3)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_all() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut store = HandleStore::new();
        store.put(Fingerprint(1), handle_entry(1, &releases, false));
        store.put(Fingerprint(2), handle_entry(2, &releases, true));
        store.put(Fingerprint(3), CacheEntry::Value(json!(42)));

        assert_eq!(store.release_all(), 3);
        assert!(store.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stats_by_shape() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut store = HandleStore::new();
        store.put(Fingerprint(1), handle_entry(1, &releases, false));
        store.put(Fingerprint(2), CacheEntry::Value(json!(1.5)));
        store.put(
            Fingerprint(3),
            CacheEntry::Group(GroupEntry {
                members: vec![Fingerprint(1)],
            }),
        );
        store.put(
            Fingerprint(4),
            CacheEntry::Composite(CompositeEntry {
                primary: Fingerprint(1),
                parts: vec![("solid0".to_string(), Fingerprint(1))],
                payload: json!({}),
            }),
        );

        let stats = store.stats();
        assert_eq!(stats.total_entries, 4);
        assert_eq!(stats.handles, 1);
        assert_eq!(stats.plain_values, 1);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.composites, 1);
    }
}
