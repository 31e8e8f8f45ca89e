//! Render worker pool for one opened document

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flume::Sender;

use super::cancel::{CancelToken, race};
use super::rasterizer::{Rasterizer, check_page_range};
use super::request::{DocumentInfo, RenderError, RenderRequest, RequestId};
use super::types::{DocumentSource, QualityTier, RawBitmap};

/// Worker threads sharing one request queue, each with its own opened copy
/// of the document.
pub struct RasterPool {
    request_tx: Sender<RenderRequest>,
    info: DocumentInfo,
    num_workers: usize,
    next_request_id: AtomicU64,
}

impl RasterPool {
    /// Spawn the workers and wait for the first one to report the page count.
    ///
    /// Fails with `SourceUnreadable` if the document cannot be opened,
    /// `MetadataTimeout` if no worker reports within `timeout`, `Cancelled`
    /// if the session is closed meanwhile.
    pub fn open(
        rasterizer: Arc<dyn Rasterizer>,
        source: &DocumentSource,
        num_workers: usize,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        let num_workers = num_workers.max(1);

        // flume for MPMC: every worker pulls from the same request queue.
        let (request_tx, request_rx) = flume::unbounded();
        let (opened_tx, opened_rx) = flume::unbounded();

        for worker in 0..num_workers {
            let rasterizer = Arc::clone(&rasterizer);
            let source = source.clone();
            let requests = request_rx.clone();
            let opened = opened_tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("render-worker-{worker}"))
                .spawn(move || {
                    super::worker::render_worker(worker, rasterizer, source, opened, requests);
                });
            if let Err(e) = spawned {
                log::error!("Failed to spawn render worker {worker}: {e}");
            }
        }
        drop(opened_tx);
        drop(request_rx);

        let info = match race(&opened_rx, cancel, timeout, RenderError::MetadataTimeout) {
            Ok(info) => info,
            Err(RenderError::WorkerGone) => {
                return Err(RenderError::unreadable("no render worker available"));
            }
            Err(e) => {
                // Workers still running exit once the request queue is dropped.
                return Err(e);
            }
        };

        log::info!(
            "Opened document: {} pages, {num_workers} render workers",
            info.page_count
        );

        Ok(Self {
            request_tx,
            info,
            num_workers,
            next_request_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.info.page_count
    }

    /// Render one page, racing the reply against `timeout` and `cancel`
    pub fn render(
        &self,
        page: u32,
        tier: QualityTier,
        scale: f32,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<RawBitmap, RenderError> {
        check_page_range(page, self.info.page_count)?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let id = RequestId::new(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (reply, reply_rx) = flume::bounded(1);
        self.request_tx
            .send(RenderRequest::Page {
                id,
                page,
                scale,
                smoothing: tier.smoothing(),
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| RenderError::WorkerGone)?;

        log::debug!("Request {id}: {tier} render of page {page} at scale {scale}");
        race(
            &reply_rx,
            cancel,
            timeout,
            RenderError::RenderTimeout { page, tier },
        )
    }

    /// Stop all workers, releasing their documents
    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }
    }
}

impl Drop for RasterPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
