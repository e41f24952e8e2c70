//! Process-wide cache of decoded chunks (strips or internal tiles).
//!
//! Parallel tiling workers each open their own handle on the same source
//! and usually need the same strips; the cache lets them share one decode.
//! Only chunks a window touches are ever decoded, so memory stays bounded
//! by the byte budget no matter how large the source is.
//!
//! Chunks are keyed by a [`SourceStamp`] (path, size and modification time,
//! taken once when a file is opened) plus the chunk index. A file rewritten
//! in place gets a new stamp and is decoded afresh.

use lru::LruCache;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

/// Byte budget shared by every open source.
const BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Identity of a file's contents at open time.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SourceStamp {
    path: Arc<str>,
    len: u64,
    modified_nanos: u128,
}

impl SourceStamp {
    /// Stamp for `path`, or `None` if its metadata cannot be read.
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        Some(Self {
            path: Arc::from(path.to_string_lossy().as_ref()),
            len: meta.len(),
            modified_nanos,
        })
    }
}

type ChunkKey = (SourceStamp, u32);

struct ChunkCache {
    budget: usize,
    used: usize,
    chunks: LruCache<ChunkKey, Arc<[f64]>>,
}

fn footprint(samples: &[f64]) -> usize {
    std::mem::size_of_val(samples)
}

impl ChunkCache {
    fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            chunks: LruCache::unbounded(),
        }
    }

    fn fetch(&mut self, key: &ChunkKey) -> Option<Arc<[f64]>> {
        self.chunks.get(key).cloned()
    }

    fn store(&mut self, key: ChunkKey, samples: Arc<[f64]>) {
        let bytes = footprint(&samples);
        if bytes > self.budget {
            return;
        }
        if let Some((_, replaced)) = self.chunks.push(key, samples) {
            self.used -= footprint(&replaced);
        }
        self.used += bytes;
        while self.used > self.budget {
            match self.chunks.pop_lru() {
                Some((_, evicted)) => self.used -= footprint(&evicted),
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.used = 0;
    }
}

static CHUNKS: LazyLock<Mutex<ChunkCache>> = LazyLock::new(|| Mutex::new(ChunkCache::with_budget(BUDGET_BYTES)));

fn locked<T>(f: impl FnOnce(&mut ChunkCache) -> T) -> T {
    // A panic while holding the lock cannot leave `used` out of step with the map
    let mut cache = CHUNKS.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut cache)
}

/// Decoded samples of `chunk` in the file stamped `stamp`, if cached.
pub fn fetch(stamp: &SourceStamp, chunk: u32) -> Option<Arc<[f64]>> {
    locked(|cache| cache.fetch(&(stamp.clone(), chunk)))
}

/// Cache the decoded samples of `chunk`.
pub fn store(stamp: &SourceStamp, chunk: u32, samples: Arc<[f64]>) {
    locked(|cache| cache.store((stamp.clone(), chunk), samples));
}

/// Drop every cached chunk.
pub fn clear() {
    locked(ChunkCache::clear);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(name: &str) -> SourceStamp {
        SourceStamp {
            path: Arc::from(name),
            len: 1,
            modified_nanos: 0,
        }
    }

    fn samples(n: usize) -> Arc<[f64]> {
        vec![0.0; n].into()
    }

    #[test]
    fn test_budget_evicts_oldest_chunk() {
        // Room for two 5-sample chunks
        let mut cache = ChunkCache::with_budget(80);
        cache.store((stamp("a"), 0), samples(5));
        cache.store((stamp("a"), 1), samples(5));
        assert!(cache.fetch(&(stamp("a"), 0)).is_some());

        cache.store((stamp("a"), 2), samples(5));
        assert!(cache.fetch(&(stamp("a"), 1)).is_none());
        assert!(cache.fetch(&(stamp("a"), 0)).is_some());
        assert!(cache.fetch(&(stamp("a"), 2)).is_some());
        assert_eq!(cache.used, 80);
    }

    #[test]
    fn test_chunks_of_different_sources_are_distinct() {
        let mut cache = ChunkCache::with_budget(1024);
        cache.store((stamp("a"), 0), samples(1));
        assert!(cache.fetch(&(stamp("b"), 0)).is_none());

        let mut rewritten = stamp("a");
        rewritten.modified_nanos = 7;
        assert!(cache.fetch(&(rewritten, 0)).is_none());
    }

    #[test]
    fn test_oversized_chunk_skipped() {
        let mut cache = ChunkCache::with_budget(16);
        cache.store((stamp("big"), 0), samples(3));
        assert!(cache.fetch(&(stamp("big"), 0)).is_none());
        assert_eq!(cache.used, 0);
    }

    #[test]
    fn test_restore_replaces_footprint() {
        let mut cache = ChunkCache::with_budget(1024);
        cache.store((stamp("a"), 3), samples(2));
        cache.store((stamp("a"), 3), samples(4));
        assert_eq!(cache.used, 32);
        assert_eq!(cache.fetch(&(stamp("a"), 3)).map(|s| s.len()), Some(4));
    }

    #[test]
    fn test_missing_file_has_no_stamp() {
        assert!(SourceStamp::of(Path::new("/nonexistent/geotiler/raster.tif")).is_none());
    }
}
