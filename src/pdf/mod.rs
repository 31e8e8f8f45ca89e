//! PDF rendering infrastructure

use std::time::Duration;

mod cache;
mod cancel;
mod pool;
mod rasterizer;
mod request;
mod service;
mod session;
mod state;
mod types;
mod worker;

pub use cache::{CacheKey, PageCache};
pub use cancel::{CancelSource, CancelToken, race};
pub use pool::RasterPool;
pub use rasterizer::{OpenDocument, Rasterizer, check_page_range};
pub use request::{DocumentInfo, RenderError, RenderReply, RenderRequest, RequestId};
pub use service::{PageLookup, PageStatus, RenderEvent, RenderService};
pub use session::ViewerSession;
pub use state::{Command, Effect, PageView, SessionEvent, SessionPhase, ViewerState};
pub use types::*;
#[cfg(feature = "pdf")]
pub use worker::MupdfRasterizer;

/// Default cache bound, in entries across all pages and tiers
pub const DEFAULT_CACHE_SIZE: usize = 8;
/// Default number of render workers
pub const DEFAULT_WORKERS: usize = 2;
/// Documents with at least this many pages are never prefetched
pub const DEFAULT_PREFETCH_PAGE_LIMIT: u32 = 200;

pub const PREVIEW_SCALE: f32 = 1.0;
pub const FINAL_SCALE: f32 = 2.2;

/// Timing and sizing knobs of the render pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct RenderConfig {
    pub preview_scale: f32,
    pub final_scale: f32,
    pub metadata_timeout: Duration,
    pub preview_timeout: Duration,
    pub final_timeout: Duration,
    /// Pause between a successful preview and its final render
    pub upgrade_delay: Duration,
    /// Pause between a successful preview and the prefetch of the next page
    pub prefetch_delay: Duration,
    /// Lifetime of the "enhanced quality" notice
    pub notice_duration: Duration,
    pub cache_capacity: usize,
    pub prefetch_page_limit: u32,
    pub render_workers: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            preview_scale: PREVIEW_SCALE,
            final_scale: FINAL_SCALE,
            metadata_timeout: Duration::from_secs(10),
            preview_timeout: Duration::from_secs(5),
            final_timeout: Duration::from_secs(12),
            upgrade_delay: Duration::from_millis(500),
            prefetch_delay: Duration::from_millis(1500),
            notice_duration: Duration::from_secs(2),
            cache_capacity: DEFAULT_CACHE_SIZE,
            prefetch_page_limit: DEFAULT_PREFETCH_PAGE_LIMIT,
            render_workers: DEFAULT_WORKERS,
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn scale(&self, tier: QualityTier) -> f32 {
        match tier {
            QualityTier::Preview => self.preview_scale,
            QualityTier::Final => self.final_scale,
        }
    }

    #[must_use]
    pub fn timeout(&self, tier: QualityTier) -> Duration {
        match tier {
            QualityTier::Preview => self.preview_timeout,
            QualityTier::Final => self.final_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets_keep_their_ordering() {
        let config = RenderConfig::default();
        assert!(config.preview_timeout < config.metadata_timeout);
        assert!(config.metadata_timeout < config.final_timeout);
        assert!(config.upgrade_delay < config.prefetch_delay);
        assert_eq!(config.scale(QualityTier::Preview), 1.0);
        assert_eq!(config.scale(QualityTier::Final), 2.2);
        assert_eq!(config.timeout(QualityTier::Final), Duration::from_secs(12));
    }
}
