//! Inode/FD Context Cache (spec §3.4, §4.3): memoizes the discovered
//! [`Geometry`] for a striped regular file for the lifetime of its inode.
//!
//! The cache is a compare-and-publish-once map: a reader that finds an
//! entry can trust it completely (invariant G1 — immutable once
//! published), and a writer that loses a publish race simply drops its own
//! allocation. There is no invalidation path other than explicit eviction
//! on inode forget, mirroring the collaborator-driven `inode_ctx`/`fd_ctx`
//! lifecycle spec §4.3 describes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::geometry::Geometry;

/// `InodeKey` is whatever the caller's inode table uses to identify a file;
/// the engine only needs it to be hashable and cheap to copy.
pub type InodeKey = u64;

/// `GeometryCache` maps inode keys to published, immutable geometry
/// descriptors (spec §3.4, §4.3).
#[derive(Default)]
pub struct GeometryCache {
    entries: RwLock<HashMap<InodeKey, Arc<Geometry>>>,
}

impl GeometryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free-for-the-caller read of an already-published descriptor
    /// (spec §4.3 "read path"). Returns `None` if nothing has been
    /// published for this inode yet.
    #[must_use]
    pub fn get(&self, key: InodeKey) -> Option<Arc<Geometry>> {
        self.entries.read().unwrap().get(&key).cloned()
    }

    /// Publishes `geometry` for `key` if nothing is published yet, and
    /// returns the winning descriptor either way (spec §4.3 "publish
    /// path": compare-swap from empty, loser's allocation is simply
    /// dropped). Concurrent callers racing to publish the same inode's
    /// first-discovered geometry always agree on the returned `Arc`.
    pub fn publish_or_get(&self, key: InodeKey, geometry: Geometry) -> Arc<Geometry> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(key)
            .or_insert_with(|| Arc::new(geometry))
            .clone()
    }

    /// Evicts the descriptor for `key`. Called from the inode-forget
    /// collaborator callback (spec §3.4 "destroyed by the inode-forget
    /// collaborator").
    pub fn forget(&self, key: InodeKey) {
        self.entries.write().unwrap().remove(&key);
    }

    /// Forces a reconfiguration: drops any published descriptor so the
    /// next access re-runs discovery (spec §3.1 invariant G1,
    /// "purge-and-relookup").
    pub fn purge(&self, key: InodeKey) {
        self.forget(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `FdContext` is the per-fd borrow of a published geometry (spec §4.3:
/// "a descriptor is also attached to every fd opened on the inode so that
/// subsequent fd-keyed fops need no re-lookup"). It never owns the
/// descriptor — only the inode context does.
#[derive(Clone)]
pub struct FdContext {
    inode: InodeKey,
    geometry: Arc<Geometry>,
}

impl FdContext {
    #[must_use]
    pub const fn new(inode: InodeKey, geometry: Arc<Geometry>) -> Self {
        Self { inode, geometry }
    }

    #[must_use]
    pub const fn inode(&self) -> InodeKey {
        self.inode
    }

    #[must_use]
    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subvolume::SubvolumeId;
    use std::sync::Barrier;
    use std::thread;

    fn geometry() -> Geometry {
        Geometry::new(4096, vec![SubvolumeId::new(0), SubvolumeId::new(1)], true).unwrap()
    }

    #[test]
    fn get_is_none_before_publish() {
        let cache = GeometryCache::new();
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn publish_then_get_returns_same_geometry() {
        let cache = GeometryCache::new();
        let published = cache.publish_or_get(1, geometry());
        let fetched = cache.get(1).expect("published");
        assert!(Arc::ptr_eq(&published, &fetched));
    }

    #[test]
    fn second_publish_loses_and_returns_first_winner() {
        let cache = GeometryCache::new();
        let first = cache.publish_or_get(1, geometry());
        let second_geometry = Geometry::new(8192, vec![SubvolumeId::new(0), SubvolumeId::new(1)], false).unwrap();
        let second = cache.publish_or_get(1, second_geometry);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.stripe_size(), 4096);
    }

    #[test]
    fn forget_evicts_the_entry() {
        let cache = GeometryCache::new();
        cache.publish_or_get(1, geometry());
        cache.forget(1);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn concurrent_publish_races_agree_on_one_winner() {
        let cache = Arc::new(GeometryCache::new());
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                cache.publish_or_get(42, geometry())
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in results.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn fd_context_borrows_the_published_geometry() {
        let cache = GeometryCache::new();
        let published = cache.publish_or_get(7, geometry());
        let fd = FdContext::new(7, published.clone());
        assert_eq!(fd.inode(), 7);
        assert!(Arc::ptr_eq(fd.geometry(), &published));
    }
}
