//! Viewer session - owns one document view and drives the state reducer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::{Receiver, Sender};

use crate::watermark::{Compositor, ViewerIdentity, WatermarkSpec};

use super::RenderConfig;
use super::cancel::CancelSource;
use super::pool::RasterPool;
use super::rasterizer::Rasterizer;
use super::request::RenderError;
use super::service::{PageStatus, RenderEvent, RenderService};
use super::state::{Command, Effect, SessionEvent, SessionPhase, ViewerState};
use super::types::{DocumentRef, QualityTier};

struct SessionInner {
    document: DocumentRef,
    rasterizer: Arc<dyn Rasterizer>,
    config: RenderConfig,
    base_label: String,
    identity: ViewerIdentity,
    cancel: CancelSource,
    state: Mutex<ViewerState>,
    service: Mutex<Option<RenderService>>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

/// One open document view.
///
/// Opening happens in the background; progress is observed through
/// [`subscribe`](Self::subscribe). Dropping the session closes it.
pub struct ViewerSession {
    inner: Arc<SessionInner>,
}

impl ViewerSession {
    /// Start opening `document`. The session begins in `Initializing`.
    pub fn open(
        document: DocumentRef,
        rasterizer: Arc<dyn Rasterizer>,
        config: RenderConfig,
        base_label: impl Into<String>,
        identity: ViewerIdentity,
    ) -> Self {
        log::info!("Opening session for document {}", document.id);
        let inner = Arc::new(SessionInner {
            state: Mutex::new(ViewerState::new(config.notice_duration)),
            document,
            rasterizer,
            config,
            base_label: base_label.into(),
            identity,
            cancel: CancelSource::new(),
            service: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        });
        inner.start_open();
        Self { inner }
    }

    /// Receive a snapshot of the current state followed by every event
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = flume::unbounded();
        // Events are broadcast under the state lock, so none can slip in
        // between the snapshot and registration.
        let state = self.inner.lock_state();
        let _ = tx.send(state.snapshot());
        lock(&self.inner.subscribers).push(tx);
        drop(state);
        rx
    }

    /// Navigate to `page`, clamped to the document
    pub fn go_to_page(&self, page: u32) {
        let Some(service) = self.inner.service() else {
            log::debug!("Ignoring navigation to page {page}: document not open");
            return;
        };

        let page = self.inner.lock_state().clamp(page);
        service.set_current_page(page);
        let lookup = service.lookup(page);
        self.inner.dispatch(Command::GoToPage {
            page,
            cached: lookup.tier(),
            failed: lookup.failed,
        });
    }

    /// Clear failed pages and the cache, or retry a failed open
    pub fn reset(&self) {
        self.inner.dispatch(Command::Reset);
    }

    /// Cancel all work. Idempotent.
    pub fn close(&self) {
        self.inner.dispatch(Command::Close);
    }

    /// Copy of the current state
    #[must_use]
    pub fn state(&self) -> ViewerState {
        self.inner.lock_state().clone()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock_state().phase.clone()
    }

    #[must_use]
    pub fn current_page(&self) -> u32 {
        self.inner.lock_state().current_page
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.inner.lock_state().total_pages
    }

    #[must_use]
    pub fn document(&self) -> &DocumentRef {
        &self.inner.document
    }

    /// Number of cached renders, 0 before the document is open
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.inner.service().map_or(0, |s| s.cache_len())
    }

    /// Drop an expired notice. Returns true if one was removed.
    pub fn clear_expired_notice(&self) -> bool {
        self.inner
            .lock_state()
            .clear_expired_notice(std::time::Instant::now())
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, ViewerState> {
        lock(&self.state)
    }

    fn service(&self) -> Option<RenderService> {
        lock(&self.service).clone()
    }

    fn broadcast(&self, event: SessionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Run a command through the reducer, then carry out its effects
    fn dispatch(self: &Arc<Self>, cmd: Command) {
        let effects = {
            let mut state = self.lock_state();
            let mut rest = Vec::new();
            for effect in state.apply(cmd) {
                match effect {
                    Effect::Emit(event) => self.broadcast(event),
                    other => rest.push(other),
                }
            }
            rest
        };

        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::EnsurePage(page) => self.spawn_ensure(page),
            Effect::Display { page, tier } => self.display(page, tier),
            Effect::Emit(event) => self.broadcast(event),
            Effect::ResetRenderer => {
                if let Some(service) = self.service() {
                    service.reset();
                }
            }
            Effect::Reopen => self.start_open(),
            Effect::CancelInFlight => {
                self.cancel.cancel();
                if let Some(service) = lock(&self.service).take() {
                    service.shutdown();
                }
                log::info!("Session for document {} closed", self.document.id);
            }
        }
    }

    fn start_open(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("session-open".to_string())
            .spawn(move || inner.run_open());
        if let Err(e) = spawned {
            log::error!("Failed to spawn document open: {e}");
            self.dispatch(Command::OpenFailed {
                reason: e.to_string(),
            });
        }
    }

    fn run_open(self: &Arc<Self>) {
        let token = self.cancel.token();
        let opened = RasterPool::open(
            Arc::clone(&self.rasterizer),
            &self.document.source,
            self.config.render_workers,
            &token,
            self.config.metadata_timeout,
        );

        let pool = match opened {
            Ok(pool) => pool,
            Err(RenderError::Cancelled) => {
                log::debug!("Open of document {} cancelled", self.document.id);
                return;
            }
            Err(e) => {
                log::error!("Failed to open document {}: {e}", self.document.id);
                self.dispatch(Command::OpenFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let total_pages = pool.page_count();
        if let Some(declared) = self.document.declared_pages.filter(|d| *d != total_pages) {
            log::info!(
                "Document {} declares {declared} pages, rasterizer reports {total_pages}",
                self.document.id
            );
        }

        let (service, events) = RenderService::new(pool, self.config.clone(), token.clone());
        {
            let mut slot = lock(&self.service);
            if token.is_cancelled() {
                service.shutdown();
                return;
            }
            *slot = Some(service.clone());
        }
        let current = {
            let state = self.lock_state();
            state.current_page.clamp(1, total_pages.max(1))
        };
        service.set_current_page(current);

        self.spawn_pump(events);
        self.dispatch(Command::Opened { total_pages });
    }

    /// Forward background upgrades into the reducer
    fn spawn_pump(self: &Arc<Self>, events: Receiver<RenderEvent>) {
        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || {
                for event in events.iter() {
                    match event {
                        RenderEvent::Upgraded { page } => inner.dispatch(Command::PageRendered {
                            page,
                            tier: QualityTier::Final,
                        }),
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn session event pump: {e}");
        }
    }

    fn spawn_ensure(self: &Arc<Self>, page: u32) {
        let Some(service) = self.service() else {
            return;
        };
        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("ensure-page-{page}"))
            .spawn(move || match service.ensure_page(page) {
                PageStatus::Ready(rendered) => inner.dispatch(Command::PageRendered {
                    page,
                    tier: rendered.tier,
                }),
                PageStatus::Unavailable => inner.dispatch(Command::PageUnavailable { page }),
                PageStatus::Cancelled => {}
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn render of page {page}: {e}");
        }
    }

    /// Watermark a cached render and publish it if it is still wanted
    fn display(self: &Arc<Self>, page: u32, tier: QualityTier) {
        let Some(service) = self.service() else {
            return;
        };
        let Some(rendered) = service.cached(page, tier) else {
            log::debug!("{tier} of page {page} left the cache before display");
            self.dispatch(Command::DisplayMissed { page, tier });
            return;
        };

        let spec = WatermarkSpec::new(self.base_label.clone(), page, service.total_pages())
            .with_identity(&self.identity);
        // Composite outside the state lock; the view is re-checked below.
        let watermarked = match Compositor::compose(&rendered, &spec) {
            Ok(watermarked) => Arc::new(watermarked),
            Err(e) => {
                log::error!("Watermarking page {page} failed: {e}");
                service.mark_failed(page);
                self.dispatch(Command::PageUnavailable { page });
                return;
            }
        };

        let state = self.lock_state();
        if state.is_showing(page, tier) {
            self.broadcast(SessionEvent::PageReady {
                page,
                tier,
                image: watermarked,
            });
        } else {
            log::debug!("Dropping stale {tier} of page {page}");
        }
        drop(state);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::pdf::{DocumentSource, PageView};
    use crate::test_utils::test_helpers::{ScriptedRasterizer, fast_config};

    fn wait_for_event(
        events: &Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while let Ok(event) = events.recv_deadline(deadline) {
            if pred(&event) {
                return true;
            }
        }
        false
    }

    #[test]
    fn display_of_an_evicted_tier_reloads_the_page() {
        let rasterizer = ScriptedRasterizer::new(3);
        let config = RenderConfig {
            prefetch_page_limit: 0,
            ..fast_config()
        };
        let session = ViewerSession::open(
            DocumentRef::new("doc", DocumentSource::from_bytes(b"%PDF".to_vec())),
            rasterizer.clone().into_shared(),
            config,
            "4Csecure",
            ViewerIdentity::anonymous(),
        );
        let events = session.subscribe();
        assert!(wait_for_event(&events, |e| matches!(
            e,
            SessionEvent::PageReady { page: 1, .. }
        )));

        // Navigation that read the cache just before page 2's preview went away.
        session.inner.dispatch(Command::GoToPage {
            page: 2,
            cached: Some(QualityTier::Preview),
            failed: false,
        });

        assert!(wait_for_event(&events, |e| matches!(
            e,
            SessionEvent::PageReady { page: 2, .. }
        )));
        assert!(matches!(session.state().view, PageView::Ready(_)));
        assert_eq!(rasterizer.render_count(2, QualityTier::Preview), 1);
    }
}
