//! Forensic watermark compositing
//!
//! Every page handed to a display consumer is a [`WatermarkedPage`]. Raw
//! renders stay inside the render service.

mod compositor;
pub mod glyphs;

use image::RgbaImage;

use crate::pdf::QualityTier;

pub use compositor::{Compositor, Ink, Layer, Mark, Shape};

/// Brand label burned into every page unless configured otherwise
pub const DEFAULT_BASE_LABEL: &str = "4Csecure";

/// Per-page watermark input. Built fresh for every composite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatermarkSpec {
    pub base_label: String,
    /// Human readable viewer identity, e.g. an email address
    pub identity_label: Option<String>,
    /// Opaque viewer id encoded in the forensic mark
    pub identity_id: Option<String>,
    pub page_number: u32,
    pub total_pages: u32,
}

impl WatermarkSpec {
    #[must_use]
    pub fn new(base_label: impl Into<String>, page_number: u32, total_pages: u32) -> Self {
        Self {
            base_label: base_label.into(),
            identity_label: None,
            identity_id: None,
            page_number,
            total_pages,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: &ViewerIdentity) -> Self {
        self.identity_label.clone_from(&identity.label);
        self.identity_id.clone_from(&identity.id);
        self
    }
}

/// Who is looking at the document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewerIdentity {
    pub label: Option<String>,
    pub id: Option<String>,
}

impl ViewerIdentity {
    #[must_use]
    pub fn new(label: Option<String>, id: Option<String>) -> Self {
        Self { label, id }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// A composited page, the only image type a display ever receives
#[derive(Clone, Debug, PartialEq)]
pub struct WatermarkedPage {
    pub page_number: u32,
    pub tier: QualityTier,
    pub image: RgbaImage,
}

impl WatermarkedPage {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("page {page} could not be decoded: {detail}")]
    DecodeFailure { page: u32, detail: String },

    #[error("cannot allocate a {width}x{height} surface")]
    Surface { width: u32, height: u32 },
}
