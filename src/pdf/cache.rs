//! Bounded page cache for rendered PDF pages
//!
//! Entries are kept in insertion order. Reads never reorder them, so the
//! eviction sweep always removes the oldest-inserted entry first.

use std::sync::Arc;

use lru::LruCache;

use super::types::{QualityTier, RenderedPage};

/// Smallest usable bound: the protected page and the page being inserted
/// must both fit.
const MIN_CAPACITY: usize = 2;

/// Cache key for rendered pages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Page number (1-based)
    pub page: u32,
    pub tier: QualityTier,
}

impl CacheKey {
    #[must_use]
    pub const fn new(page: u32, tier: QualityTier) -> Self {
        Self { page, tier }
    }
}

/// Insertion-ordered cache of rendered pages.
///
/// A `final` entry supersedes the `preview` entry of the same page, and a
/// preview is never stored next to an existing final.
pub struct PageCache {
    cache: LruCache<CacheKey, Arc<RenderedPage>>,
    capacity: usize,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            capacity: capacity.max(MIN_CAPACITY),
        }
    }

    /// Get a cached page without touching the insertion order
    #[must_use]
    pub fn get(&self, page: u32, tier: QualityTier) -> Option<Arc<RenderedPage>> {
        self.cache.peek(&CacheKey::new(page, tier)).cloned()
    }

    /// Best available entry for a page, final before preview
    #[must_use]
    pub fn best(&self, page: u32) -> Option<Arc<RenderedPage>> {
        self.get(page, QualityTier::Final)
            .or_else(|| self.get(page, QualityTier::Preview))
    }

    /// Whether any tier of `page` is cached
    #[must_use]
    pub fn contains_page(&self, page: u32) -> bool {
        self.cache.contains(&CacheKey::new(page, QualityTier::Final))
            || self.cache.contains(&CacheKey::new(page, QualityTier::Preview))
    }

    /// Insert a rendered page and enforce the bound.
    ///
    /// Returns the entry that now represents the page: the inserted one, or
    /// the existing final when a late preview arrives after it. Entries of
    /// `protected` (the displayed page) survive the sweep.
    pub fn insert(&mut self, rendered: RenderedPage, protected: Option<u32>) -> Arc<RenderedPage> {
        let page = rendered.page_number;
        let tier = rendered.tier;

        if tier == QualityTier::Preview {
            if let Some(existing) = self.get(page, QualityTier::Final) {
                log::debug!("Page cache: final of page {page} present, dropping preview");
                return existing;
            }
        }

        let arc = Arc::new(rendered);
        self.cache.put(CacheKey::new(page, tier), Arc::clone(&arc));

        if tier == QualityTier::Final
            && self
                .cache
                .pop(&CacheKey::new(page, QualityTier::Preview))
                .is_some()
        {
            log::debug!("Page cache: final of page {page} replaced its preview");
        }

        self.sweep(page, protected);
        arc
    }

    fn sweep(&mut self, inserting: u32, protected: Option<u32>) {
        while self.cache.len() > self.capacity {
            // Reverse iteration walks from the oldest insert forward.
            let victim = self
                .cache
                .iter()
                .rev()
                .map(|(key, _)| *key)
                .find(|key| key.page != inserting && Some(key.page) != protected);

            let Some(victim) = victim else {
                break;
            };
            self.cache.pop(&victim);
            log::debug!(
                "Page cache: evicted {} of page {} ({} entries)",
                victim.tier,
                victim.page,
                self.cache.len()
            );
        }
    }

    /// Invalidate all cached versions of a specific page
    pub fn invalidate_page(&mut self, page: u32) {
        self.cache.pop(&CacheKey::new(page, QualityTier::Preview));
        self.cache.pop(&CacheKey::new(page, QualityTier::Final));
    }

    /// Clear all cached pages
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest insert
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.cache.iter().rev().map(|(key, _)| *key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::RawBitmap;
    use super::*;

    fn rendered(page: u32, tier: QualityTier) -> RenderedPage {
        RenderedPage::from_bitmap(page, tier, 1.0, RawBitmap::solid(2, 2, [255, 255, 255]))
    }

    #[test]
    fn cache_insert_and_get() {
        let mut cache = PageCache::new(8);
        cache.insert(rendered(1, QualityTier::Preview), None);

        assert!(cache.get(1, QualityTier::Preview).is_some());
        assert!(cache.get(1, QualityTier::Final).is_none());
        assert!(cache.contains_page(1));
        assert!(!cache.contains_page(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn final_supersedes_preview() {
        let mut cache = PageCache::new(8);
        cache.insert(rendered(3, QualityTier::Preview), None);
        cache.insert(rendered(3, QualityTier::Final), None);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(3, QualityTier::Preview).is_none());
        assert_eq!(cache.best(3).map(|p| p.tier), Some(QualityTier::Final));
    }

    #[test]
    fn late_preview_does_not_replace_final() {
        let mut cache = PageCache::new(8);
        cache.insert(rendered(3, QualityTier::Final), None);
        let kept = cache.insert(rendered(3, QualityTier::Preview), None);

        assert_eq!(kept.tier, QualityTier::Final);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(3, QualityTier::Preview).is_none());
    }

    #[test]
    fn evicts_oldest_inserted_first() {
        let mut cache = PageCache::new(3);
        for page in 1..=3 {
            cache.insert(rendered(page, QualityTier::Preview), None);
        }
        // Reads must not refresh page 1.
        let _ = cache.get(1, QualityTier::Preview);
        cache.insert(rendered(4, QualityTier::Preview), None);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains_page(1));
        assert_eq!(
            cache.keys().iter().map(|k| k.page).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn protected_page_survives_sweep() {
        let mut cache = PageCache::new(3);
        for page in 1..=3 {
            cache.insert(rendered(page, QualityTier::Preview), None);
        }
        cache.insert(rendered(4, QualityTier::Final), Some(1));

        assert_eq!(cache.len(), 3);
        assert!(cache.contains_page(1));
        assert!(!cache.contains_page(2));
        assert!(cache.contains_page(4));
    }

    #[test]
    fn bound_holds_across_many_inserts() {
        let mut cache = PageCache::new(8);
        for page in 1..=30 {
            cache.insert(rendered(page, QualityTier::Preview), Some(1));
            cache.insert(rendered(page, QualityTier::Final), Some(1));
            assert!(cache.len() <= 8);
        }
        assert!(cache.contains_page(1));
    }

    #[test]
    fn capacity_has_a_floor() {
        let cache = PageCache::new(0);
        assert_eq!(cache.capacity(), 2);
    }
}
