//! Rasterizer capability boundary
//!
//! The PDF engine is treated as a black box: open a source, ask for the page
//! count, render one page at a scale. Implementations run on render worker
//! threads, and the opened document never leaves the thread that opened it.

use super::request::RenderError;
use super::types::{DocumentSource, RawBitmap, Smoothing};

/// Opens documents. Shared by every worker of a session.
pub trait Rasterizer: Send + Sync + 'static {
    fn open(&self, source: &DocumentSource) -> Result<Box<dyn OpenDocument>, RenderError>;
}

/// An opened document, owned by a single worker thread
pub trait OpenDocument {
    fn page_count(&self) -> u32;

    /// Render a 1-based page at `scale` times its native point size
    fn render_page(
        &self,
        page: u32,
        scale: f32,
        smoothing: Smoothing,
    ) -> Result<RawBitmap, RenderError>;
}

/// Reject page numbers outside `[1, page_count]`
pub fn check_page_range(page: u32, page_count: u32) -> Result<(), RenderError> {
    if page == 0 || page > page_count {
        return Err(RenderError::PageOutOfRange { page, page_count });
    }
    Ok(())
}
