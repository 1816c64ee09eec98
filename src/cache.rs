//! LRU cache of canvas-stage output

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::types::RasterPixels;

/// Cache key for canvas output. The artifact revision is part of the
/// key so a mutation can never resurface stale pixels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RasterKey {
    /// Artifact revision the pixels were rendered from
    pub revision: u64,
    /// Page number
    pub page: usize,
    /// Surface width in pixels
    pub width_px: u32,
    /// Surface height in pixels
    pub height_px: u32,
}

/// LRU cache letting a canvas chain skip the kernel when a page was
/// already rasterized at the same revision and dimensions
pub struct RasterCache {
    cache: LruCache<RasterKey, Arc<RasterPixels>>,
}

impl RasterCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is non-zero")),
            ),
        }
    }

    /// Get cached pixels, promoting them in the LRU order
    #[must_use]
    pub fn get(&mut self, key: &RasterKey) -> Option<Arc<RasterPixels>> {
        self.cache.get(key).cloned()
    }

    /// Check membership without promoting
    #[must_use]
    pub fn contains(&self, key: &RasterKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert pixels, returning the shared handle
    pub fn insert(&mut self, key: RasterKey, pixels: RasterPixels) -> Arc<RasterPixels> {
        let arc = Arc::new(pixels);
        self.cache.put(key, arc.clone());
        arc
    }

    /// Drop every entry
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    /// Drop all cached rasters of one page
    pub fn invalidate_page(&mut self, page: usize) {
        let stale: Vec<_> = self
            .cache
            .iter()
            .filter(|(k, _)| k.page == page)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stale {
            self.cache.pop(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(revision: u64, page: usize) -> RasterKey {
        RasterKey {
            revision,
            page,
            width_px: 100,
            height_px: 200,
        }
    }

    fn pixels() -> RasterPixels {
        RasterPixels {
            pixels: vec![0; 100 * 200 * 4],
            width_px: 100,
            height_px: 200,
        }
    }

    #[test]
    fn insert_and_get() {
        let mut cache = RasterCache::new(4);
        cache.insert(key(0, 0), pixels());
        assert!(cache.contains(&key(0, 0)));
        assert!(cache.get(&key(0, 0)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn revision_isolates_entries() {
        let mut cache = RasterCache::new(4);
        cache.insert(key(0, 0), pixels());
        assert!(!cache.contains(&key(1, 0)));
    }

    #[test]
    fn lru_eviction() {
        let mut cache = RasterCache::new(2);
        for page in 0..3 {
            cache.insert(key(0, page), pixels());
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(0, 0)));
        assert!(cache.contains(&key(0, 1)));
        assert!(cache.contains(&key(0, 2)));
    }

    #[test]
    fn invalidate_page_leaves_others() {
        let mut cache = RasterCache::new(8);
        cache.insert(key(0, 0), pixels());
        cache.insert(key(1, 0), pixels());
        cache.insert(key(0, 1), pixels());

        cache.invalidate_page(0);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(0, 1)));
    }
}
