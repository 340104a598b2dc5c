//! Bounded, thread-safe lazy memory-map cache for file contents.
//!
//! Files are mapped on first grep access and held until invalidated by the
//! watcher, evicted by the LRU bound, or cleared on a full rescan. Uses
//! `parking_lot::RwLock` for minimal contention on the hot read path during
//! parallel grep.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;
use parking_lot::RwLock;

/// Default cap on concurrently held maps. Evicted maps stay alive until the
/// last `Arc` holder drops them, so eviction never invalidates a reader.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

struct CacheSlot {
    mmap: Arc<Mmap>,
    last_used: u64,
}

pub struct MmapCache {
    cache: RwLock<HashMap<PathBuf, CacheSlot>>,
    clock: AtomicU64,
    max_file_size: u64,
    max_entries: usize,
}

impl MmapCache {
    pub fn new(max_file_size: u64) -> Self {
        Self::with_capacity(max_file_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_file_size: u64, max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            max_file_size,
            max_entries: max_entries.max(1),
        }
    }

    /// Get a cached mmap or create one. Returns `None` if the file is too
    /// large, empty, or cannot be opened/mapped.
    ///
    /// The returned `Arc<Mmap>` is safe to hold across lock boundaries -
    /// even after eviction the map stays alive until all references drop.
    #[inline]
    pub fn get_or_insert(&self, path: &Path, size: u64) -> Option<Arc<Mmap>> {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);

        // Fast path: read lock only; the LRU stamp update is racy by design,
        // a stale stamp only slightly degrades eviction order.
        {
            let cache = self.cache.read();
            if let Some(slot) = cache.get(path) {
                return Some(Arc::clone(&slot.mmap));
            }
        }

        if size == 0 || size > self.max_file_size {
            return None;
        }

        let file = File::open(path).ok()?;
        // SAFETY: the watcher invalidates this entry on file modification.
        // Concurrent readers hold Arc<Mmap>, which outlives eviction. The
        // residual risk is SIGBUS if the file is truncated while mapped -
        // acceptable for a code search tool, source files are rarely
        // truncated in place.
        let mmap = unsafe { Mmap::map(&file) }.ok()?;
        let arc = Arc::new(mmap);

        let mut cache = self.cache.write();
        if cache.len() >= self.max_entries && !cache.contains_key(path) {
            evict_oldest(&mut cache);
        }
        let slot = cache.entry(path.to_path_buf()).or_insert_with(|| CacheSlot {
            mmap: Arc::clone(&arc),
            last_used: stamp,
        });
        slot.last_used = stamp;
        Some(Arc::clone(&slot.mmap))
    }

    /// Remove a single entry. Called by the watcher on file change or
    /// removal - mandatory before the underlying file is reopened.
    #[inline]
    pub fn invalidate(&self, path: &Path) {
        self.cache.write().remove(path);
    }

    /// Drop every entry. Called on full rescan.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Number of cached entries (diagnostics).
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

fn evict_oldest(cache: &mut HashMap<PathBuf, CacheSlot>) {
    let oldest = cache
        .iter()
        .min_by_key(|(_, slot)| slot.last_used)
        .map(|(path, _)| path.clone());
    if let Some(path) = oldest {
        cache.remove(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn caches_and_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.txt", "hello");
        let cache = MmapCache::new(1024);

        let mmap = cache.get_or_insert(&path, 5).unwrap();
        assert_eq!(&mmap[..], b"hello");
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "big.txt", "0123456789");
        let cache = MmapCache::new(4);

        assert!(cache.get_or_insert(&path, 0).is_none());
        assert!(cache.get_or_insert(&path, 10).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_by_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MmapCache::with_capacity(1024, 2);

        let a = write_file(dir.path(), "a.txt", "aa");
        let b = write_file(dir.path(), "b.txt", "bb");
        let c = write_file(dir.path(), "c.txt", "cc");

        cache.get_or_insert(&a, 2).unwrap();
        cache.get_or_insert(&b, 2).unwrap();
        // touch a so b becomes the eviction candidate
        let held = cache.get_or_insert(&a, 2).unwrap();
        cache.get_or_insert(&c, 2).unwrap();

        assert_eq!(cache.len(), 2);
        // the held Arc stays readable regardless of eviction
        assert_eq!(&held[..], b"aa");
    }
}
