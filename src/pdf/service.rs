//! Render service - progressive preview/final rendering over the worker pool
//!
//! `ensure_page` returns as soon as a preview exists. The final-quality
//! upgrade and the prefetch of the next page run on their own threads and
//! report back through [`RenderEvent`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::{Receiver, Sender};

use super::RenderConfig;
use super::cache::{CacheKey, PageCache};
use super::cancel::CancelToken;
use super::pool::RasterPool;
use super::request::RenderError;
use super::types::{QualityTier, RenderedPage};

type RenderResult = Result<Arc<RenderedPage>, RenderError>;

/// Outcome of [`RenderService::ensure_page`]
#[derive(Clone, Debug)]
pub enum PageStatus {
    /// Best image currently available for the page
    Ready(Arc<RenderedPage>),
    /// The page failed at both tiers, or was marked failed
    Unavailable,
    /// The session was closed while the page was loading
    Cancelled,
}

/// Background progress reported by the render service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    /// A final-quality render of `page` has been cached
    Upgraded { page: u32 },
}

/// What the service knows about a page without doing any work
#[derive(Clone, Debug, Default)]
pub struct PageLookup {
    pub best: Option<Arc<RenderedPage>>,
    pub failed: bool,
}

impl PageLookup {
    #[must_use]
    pub fn tier(&self) -> Option<QualityTier> {
        self.best.as_ref().map(|page| page.tier)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    /// This call issued the render
    Leader,
    /// This call waited on someone else's render or hit the cache
    Joined,
}

struct Shared {
    cache: PageCache,
    failed: HashSet<u32>,
    in_flight: HashMap<CacheKey, Vec<Sender<RenderResult>>>,
    current_page: u32,
}

struct Inner {
    pool: RasterPool,
    config: RenderConfig,
    cancel: CancelToken,
    shared: Mutex<Shared>,
    events: Sender<RenderEvent>,
}

/// Progressive render controller for one session. Cheap to clone.
#[derive(Clone)]
pub struct RenderService {
    inner: Arc<Inner>,
}

impl RenderService {
    /// Wrap an opened pool. The receiver carries background upgrade events.
    #[must_use]
    pub fn new(
        pool: RasterPool,
        config: RenderConfig,
        cancel: CancelToken,
    ) -> (Self, Receiver<RenderEvent>) {
        let (events, events_rx) = flume::unbounded();
        let shared = Shared {
            cache: PageCache::new(config.cache_capacity),
            failed: HashSet::new(),
            in_flight: HashMap::new(),
            current_page: 1,
        };
        let service = Self {
            inner: Arc::new(Inner {
                pool,
                config,
                cancel,
                shared: Mutex::new(shared),
                events,
            }),
        };
        (service, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.inner.pool.page_count()
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Deliver the best image for `page`, rendering a preview if needed.
    ///
    /// Blocks only for the preview (or, when the preview fails, the
    /// immediate final attempt).
    pub fn ensure_page(&self, page: u32) -> PageStatus {
        if self.inner.cancel.is_cancelled() {
            return PageStatus::Cancelled;
        }

        {
            let shared = self.lock();
            if let Some(hit) = shared.cache.get(page, QualityTier::Final) {
                return PageStatus::Ready(hit);
            }
            if shared.failed.contains(&page) {
                log::debug!("Page {page} previously failed, not retrying");
                return PageStatus::Unavailable;
            }
            if let Some(hit) = shared.cache.get(page, QualityTier::Preview) {
                return PageStatus::Ready(hit);
            }
        }

        let preview_err = match self.render_tier(page, QualityTier::Preview) {
            Ok((rendered, role)) => {
                if role == Role::Leader && rendered.tier == QualityTier::Preview {
                    self.schedule_upgrade(page);
                    self.schedule_prefetch(page);
                }
                return PageStatus::Ready(rendered);
            }
            Err(RenderError::Cancelled) => return PageStatus::Cancelled,
            Err(e @ RenderError::PageOutOfRange { .. }) => {
                log::warn!("Ignoring request outside the document: {e}");
                return PageStatus::Unavailable;
            }
            Err(e) => e,
        };

        log::warn!("Preview of page {page} failed ({preview_err}), trying final quality");
        match self.render_tier(page, QualityTier::Final) {
            Ok((rendered, _)) => PageStatus::Ready(rendered),
            Err(RenderError::Cancelled) => PageStatus::Cancelled,
            Err(final_err) => {
                log::error!("Page {page} unavailable: {final_err}");
                self.mark_failed(page);
                PageStatus::Unavailable
            }
        }
    }

    /// Render one tier of a page, joining a render already in flight.
    fn render_tier(&self, page: u32, tier: QualityTier) -> Result<(Arc<RenderedPage>, Role), RenderError> {
        let key = CacheKey::new(page, tier);

        let waiter = {
            let mut shared = self.lock();
            if let Some(hit) = shared.cache.get(page, tier) {
                return Ok((hit, Role::Joined));
            }
            if let Some(waiters) = shared.in_flight.get_mut(&key) {
                let (tx, rx) = flume::bounded(1);
                waiters.push(tx);
                Some(rx)
            } else {
                shared.in_flight.insert(key, Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            log::debug!("Joining in-flight {tier} render of page {page}");
            // The leader always answers: its own call is bounded by a timeout.
            return match rx.recv() {
                Ok(result) => result.map(|rendered| (rendered, Role::Joined)),
                Err(_) => Err(RenderError::Cancelled),
            };
        }

        let scale = self.inner.config.scale(tier);
        let timeout = self.inner.config.timeout(tier);
        let outcome = self
            .inner
            .pool
            .render(page, tier, scale, &self.inner.cancel, timeout)
            .map(|bitmap| RenderedPage::from_bitmap(page, tier, scale, bitmap));

        let mut shared = self.lock();
        let waiters = shared.in_flight.remove(&key).unwrap_or_default();
        let result = match outcome {
            // Nothing is written to the cache once the session is cancelled.
            Ok(_) if self.inner.cancel.is_cancelled() => Err(RenderError::Cancelled),
            Ok(rendered) => {
                let protected = Some(shared.current_page);
                let stored = shared.cache.insert(rendered, protected);
                log::debug!(
                    "Cached {tier} of page {page} ({} entries)",
                    shared.cache.len()
                );
                Ok(stored)
            }
            Err(e) => Err(e),
        };
        drop(shared);

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result.map(|rendered| (rendered, Role::Leader))
    }

    fn schedule_upgrade(&self, page: u32) {
        let service = self.clone();
        let delay = self.inner.config.upgrade_delay;

        let spawned = std::thread::Builder::new()
            .name(format!("upgrade-page-{page}"))
            .spawn(move || {
                if !service.inner.cancel.sleep(delay) {
                    return;
                }
                if service.cached(page, QualityTier::Final).is_some() || service.is_failed(page) {
                    return;
                }

                match service.render_tier(page, QualityTier::Final) {
                    Ok(_) => {
                        log::info!("Page {page} upgraded to final quality");
                        let _ = service.inner.events.send(RenderEvent::Upgraded { page });
                    }
                    Err(RenderError::Cancelled) => {
                        log::debug!("Final render of page {page} cancelled");
                    }
                    // The preview stays on screen; no retry.
                    Err(e) => log::warn!("Final render of page {page} failed, keeping preview: {e}"),
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to schedule upgrade of page {page}: {e}");
        }
    }

    fn schedule_prefetch(&self, page: u32) {
        let total = self.total_pages();
        if total >= self.inner.config.prefetch_page_limit || page >= total {
            return;
        }

        let next = page + 1;
        let service = self.clone();
        let delay = self.inner.config.prefetch_delay;

        let spawned = std::thread::Builder::new()
            .name(format!("prefetch-page-{next}"))
            .spawn(move || {
                if !service.inner.cancel.sleep(delay) {
                    return;
                }
                {
                    let shared = service.lock();
                    if shared.cache.contains_page(next) || shared.failed.contains(&next) {
                        return;
                    }
                }

                log::debug!("Prefetching page {next}");
                if let PageStatus::Unavailable = service.ensure_page(next) {
                    log::debug!("Prefetch of page {next} failed");
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to schedule prefetch of page {next}: {e}");
        }
    }

    /// Cached image and failure flag for `page`, without rendering
    #[must_use]
    pub fn lookup(&self, page: u32) -> PageLookup {
        let shared = self.lock();
        PageLookup {
            best: shared.cache.best(page),
            failed: shared.failed.contains(&page),
        }
    }

    #[must_use]
    pub fn cached(&self, page: u32, tier: QualityTier) -> Option<Arc<RenderedPage>> {
        self.lock().cache.get(page, tier)
    }

    #[must_use]
    pub fn is_failed(&self, page: u32) -> bool {
        self.lock().failed.contains(&page)
    }

    /// The displayed page; its cache entries are protected from eviction
    pub fn set_current_page(&self, page: u32) {
        self.lock().current_page = page;
    }

    /// Mark a page unavailable until the next [`reset`](Self::reset)
    pub fn mark_failed(&self, page: u32) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let mut shared = self.lock();
        shared.cache.invalidate_page(page);
        shared.failed.insert(page);
    }

    /// Forget failed pages and drop every cached render
    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.cache.clear();
        shared.failed.clear();
        log::info!("Render service reset");
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Release the render workers
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }
}
