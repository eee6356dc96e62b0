//! Content-addressed object stores. The default is an in-memory map; a TTL
//! variant expires idle entries; the null store drops everything, which every
//! operation must survive by re-fetching.
//!
//! Stores are shared across concurrent operations and must be internally
//! synchronized. `add` of equal content is idempotent, so concurrent inserts
//! of the same hash are safe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::{hash::ObjectHash, internal::pack::entry::Entry};

/// Map from hash to immutable object bytes.
///
/// Implementations must tolerate overwrites with identical content and must
/// never block protocol progress: a store that always misses only costs
/// re-fetches.
pub trait ObjectStorage: Send + Sync {
    /// Look up an object; `None` when absent (or expired).
    fn get(&self, hash: &ObjectHash) -> Option<Entry>;

    /// Insert objects. Insertion order is irrelevant and re-adding an
    /// existing hash is a no-op replace with identical content.
    fn add(&self, entries: Vec<Entry>);

    /// Remove one object if present.
    fn delete(&self, hash: &ObjectHash);

    /// Unordered snapshot of all keys.
    fn all_keys(&self) -> Vec<ObjectHash>;

    /// Number of stored objects.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to a store.
pub type SharedStorage = Arc<dyn ObjectStorage>;

/// The default store: a concurrent in-memory map.
#[derive(Default)]
pub struct MemoryStorage {
    objects: DashMap<ObjectHash, Entry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStorage for MemoryStorage {
    fn get(&self, hash: &ObjectHash) -> Option<Entry> {
        self.objects.get(hash).map(|e| e.value().clone())
    }

    fn add(&self, entries: Vec<Entry>) {
        for entry in entries {
            self.objects.insert(entry.hash, entry);
        }
    }

    fn delete(&self, hash: &ObjectHash) {
        self.objects.remove(hash);
    }

    fn all_keys(&self) -> Vec<ObjectHash> {
        self.objects.iter().map(|e| *e.key()).collect()
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

/// A store whose entries expire after sitting unread for `ttl`. Every `get`
/// refreshes the deadline; [`TtlStorage::sweep`] removes whatever lapsed.
pub struct TtlStorage {
    objects: DashMap<ObjectHash, (Entry, Instant)>,
    ttl: Duration,
}

impl TtlStorage {
    pub fn new(ttl: Duration) -> Self {
        Self {
            objects: DashMap::new(),
            ttl,
        }
    }

    /// Drop every entry whose deadline has passed; returns how many were
    /// removed. Callers typically run this from a periodic task:
    ///
    /// ```ignore
    /// let store = Arc::new(TtlStorage::new(ttl));
    /// tokio::spawn({
    ///     let store = store.clone();
    ///     async move {
    ///         loop {
    ///             tokio::time::sleep(interval).await;
    ///             store.sweep();
    ///         }
    ///     }
    /// });
    /// ```
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.objects.len();
        self.objects.retain(|_, (_, deadline)| *deadline > now);
        before - self.objects.len()
    }
}

impl ObjectStorage for TtlStorage {
    fn get(&self, hash: &ObjectHash) -> Option<Entry> {
        let mut slot = self.objects.get_mut(hash)?;
        let now = Instant::now();
        if slot.value().1 <= now {
            drop(slot);
            self.objects.remove(hash);
            return None;
        }
        slot.value_mut().1 = now + self.ttl;
        Some(slot.value().0.clone())
    }

    fn add(&self, entries: Vec<Entry>) {
        let deadline = Instant::now() + self.ttl;
        for entry in entries {
            self.objects.insert(entry.hash, (entry, deadline));
        }
    }

    fn delete(&self, hash: &ObjectHash) {
        self.objects.remove(hash);
    }

    fn all_keys(&self) -> Vec<ObjectHash> {
        self.objects.iter().map(|e| *e.key()).collect()
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

/// A store that remembers nothing. Operations running against it succeed by
/// re-fetching every object they need.
#[derive(Default)]
pub struct NullStorage;

impl ObjectStorage for NullStorage {
    fn get(&self, _hash: &ObjectHash) -> Option<Entry> {
        None
    }

    fn add(&self, _entries: Vec<Entry>) {}

    fn delete(&self, _hash: &ObjectHash) {}

    fn all_keys(&self) -> Vec<ObjectHash> {
        Vec::new()
    }

    fn len(&self) -> usize {
        0
    }
}
