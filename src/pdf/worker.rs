//! PDF render worker - runs in separate thread(s)

use std::sync::Arc;

use flume::{Receiver, Sender};

use super::rasterizer::{Rasterizer, check_page_range};
use super::request::{DocumentInfo, RenderError, RenderRequest};
use super::types::DocumentSource;

/// Main worker function - runs in a dedicated thread.
///
/// Opens its own copy of the document, reports the page count on `opened`,
/// then serves page requests until shutdown or until every sender is gone.
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn render_worker(
    worker: usize,
    rasterizer: Arc<dyn Rasterizer>,
    source: DocumentSource,
    opened: Sender<Result<DocumentInfo, RenderError>>,
    requests: Receiver<RenderRequest>,
) {
    let doc = match rasterizer.open(&source) {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!("Render worker {worker} could not open document: {e}");
            let _ = opened.send(Err(e));
            return;
        }
    };

    let page_count = doc.page_count();
    log::debug!("Render worker {worker} opened document with {page_count} pages");
    let _ = opened.send(Ok(DocumentInfo { page_count }));

    for request in requests {
        match request {
            RenderRequest::Page {
                id,
                page,
                scale,
                smoothing,
                cancel,
                reply,
            } => {
                // The caller stopped waiting; skip work nobody will read.
                if cancel.is_cancelled() || reply.is_disconnected() {
                    log::debug!("Render worker {worker} dropping request {id} for page {page}");
                    let _ = reply.send(Err(RenderError::Cancelled));
                    continue;
                }

                let result = check_page_range(page, page_count)
                    .and_then(|()| doc.render_page(page, scale, smoothing));
                if let Err(e) = &result {
                    log::debug!("Render worker {worker} request {id}: {e}");
                }
                let _ = reply.send(result);
            }

            RenderRequest::Shutdown => break,
        }
    }

    log::debug!("Render worker {worker} shutting down");
}

#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfRasterizer;

#[cfg(feature = "pdf")]
mod mupdf_backend {
    use std::num::NonZeroU32;

    use fast_image_resize as fir;
    use mupdf::{Colorspace, Document, Matrix, Pixmap};

    use super::super::rasterizer::{OpenDocument, Rasterizer};
    use super::super::request::RenderError;
    use super::super::types::{DocumentSource, RawBitmap, Smoothing};

    const PDF_MIME: &str = "application/pdf";

    /// Oversampling factor for [`Smoothing::High`]; the pixmap is rendered
    /// this much larger and filtered back down to the requested scale.
    const HIGH_SMOOTHING_SUPERSAMPLE: f32 = 1.5;

    /// MuPDF-backed rasterizer
    #[derive(Clone, Copy, Debug, Default)]
    pub struct MupdfRasterizer;

    struct MupdfDocument {
        doc: Document,
        page_count: u32,
    }

    impl Rasterizer for MupdfRasterizer {
        fn open(&self, source: &DocumentSource) -> Result<Box<dyn OpenDocument>, RenderError> {
            let doc = match source {
                DocumentSource::Path(path) => Document::open(path.to_string_lossy().as_ref()),
                DocumentSource::Bytes(bytes) => Document::from_bytes(bytes, PDF_MIME),
            }
            .map_err(|e| RenderError::unreadable(e.to_string()))?;

            let page_count = doc
                .page_count()
                .map_err(|e| RenderError::unreadable(e.to_string()))?;
            if page_count <= 0 {
                return Err(RenderError::unreadable("document has no pages"));
            }

            Ok(Box::new(MupdfDocument {
                doc,
                page_count: page_count as u32,
            }))
        }
    }

    impl OpenDocument for MupdfDocument {
        fn page_count(&self) -> u32 {
            self.page_count
        }

        fn render_page(
            &self,
            page_num: u32,
            scale: f32,
            smoothing: Smoothing,
        ) -> Result<RawBitmap, RenderError> {
            let fail = |e: mupdf::error::Error| RenderError::failure(page_num, e.to_string());

            let page = self.doc.load_page(page_num as i32 - 1).map_err(fail)?;
            let oversample = match smoothing {
                Smoothing::Medium => 1.0,
                Smoothing::High => HIGH_SMOOTHING_SUPERSAMPLE,
            };
            let mag = scale * oversample;

            let rgb = Colorspace::device_rgb();
            let pixmap = page
                .to_pixmap(&Matrix::new_scale(mag, mag), &rgb, false, false)
                .map_err(fail)?;
            let pixels = pixmap_to_rgb(&pixmap).map_err(|msg| RenderError::failure(page_num, msg))?;
            let (width, height) = (pixmap.width(), pixmap.height());

            if oversample <= 1.0 {
                return Ok(RawBitmap {
                    pixels,
                    width,
                    height,
                });
            }

            let dst_width = ((width as f32 / oversample).round() as u32).max(1);
            let dst_height = ((height as f32 / oversample).round() as u32).max(1);
            let pixels = downsample_rgb(pixels, (width, height), (dst_width, dst_height))
                .map_err(|msg| RenderError::failure(page_num, msg))?;
            Ok(RawBitmap {
                pixels,
                width: dst_width,
                height: dst_height,
            })
        }
    }

    fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<Vec<u8>, String> {
        let n = pixmap.n() as usize;
        if n < 3 {
            return Err(format!("Unsupported pixmap format: {n} channels"));
        }

        let width = pixmap.width() as usize;
        let height = pixmap.height() as usize;
        let stride = pixmap.stride() as usize;
        let samples = pixmap.samples();
        let row_bytes = width * n;
        let expected_min = stride.saturating_mul(height);
        if samples.len() < expected_min || row_bytes > stride {
            return Err("Pixmap buffer size mismatch".to_string());
        }

        let mut out = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let row_start = y * stride;
            let row = &samples[row_start..row_start + row_bytes];
            if n == 3 {
                out.extend_from_slice(row);
            } else {
                for px in row.chunks_exact(n) {
                    out.extend_from_slice(&px[..3]);
                }
            }
        }

        Ok(out)
    }

    fn downsample_rgb(
        pixels: Vec<u8>,
        (src_width, src_height): (u32, u32),
        (dst_width, dst_height): (u32, u32),
    ) -> Result<Vec<u8>, String> {
        let nz = |v: u32, what: &str| NonZeroU32::new(v).ok_or_else(|| format!("Invalid {what}"));

        let src = fir::Image::from_vec_u8(
            nz(src_width, "source width")?,
            nz(src_height, "source height")?,
            pixels,
            fir::PixelType::U8x3,
        )
        .map_err(|e| format!("Resize source error: {e}"))?;
        let mut dst = fir::Image::new(
            nz(dst_width, "target width")?,
            nz(dst_height, "target height")?,
            fir::PixelType::U8x3,
        );
        let mut resizer =
            fir::Resizer::new(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
        resizer
            .resize(&src.view(), &mut dst.view_mut())
            .map_err(|e| format!("Resize error: {e}"))?;

        Ok(dst.into_vec())
    }
}
