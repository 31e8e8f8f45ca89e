//! Core types for PDF rendering

use std::path::PathBuf;
use std::sync::Arc;

/// Where the document bytes come from.
///
/// Storage and access control are resolved before a document reaches the
/// viewer, so the only sources are a readable local path or bytes already
/// fetched into memory.
#[derive(Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl DocumentSource {
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A document as described by the external catalogue.
///
/// `declared_pages` is informational only: the authoritative page count is
/// the one reported by the rasterizer once the source has been opened.
#[derive(Clone, Debug)]
pub struct DocumentRef {
    pub id: String,
    pub title: Option<String>,
    pub source: DocumentSource,
    pub byte_size: Option<u64>,
    pub declared_pages: Option<u32>,
}

impl DocumentRef {
    #[must_use]
    pub fn new(id: impl Into<String>, source: DocumentSource) -> Self {
        Self {
            id: id.into(),
            title: None,
            source,
            byte_size: None,
            declared_pages: None,
        }
    }

    /// Human readable file size, e.g. `"1.5 MB"`
    #[must_use]
    pub fn display_size(&self) -> String {
        format_file_size(self.byte_size)
    }
}

#[must_use]
pub fn format_file_size(bytes: Option<u64>) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    let Some(bytes) = bytes.filter(|b| *b > 0) else {
        return "Unknown size".to_string();
    };

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

/// Interpolation quality requested from the rasterizer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Smoothing {
    Medium,
    High,
}

/// Fidelity of a rendered page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityTier {
    /// Fast, lower-fidelity render shown immediately
    Preview,
    /// Slower high-fidelity render that supersedes the preview
    Final,
}

impl QualityTier {
    #[must_use]
    pub const fn smoothing(self) -> Smoothing {
        match self {
            Self::Preview => Smoothing::Medium,
            Self::Final => Smoothing::High,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw rendered page pixels produced by the rasterizer.
///
/// RGB, 3 bytes per pixel, rows packed without padding.
#[derive(Clone)]
pub struct RawBitmap {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawBitmap {
    /// A bitmap filled with a single colour
    #[must_use]
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let len = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(len * 3);
        for _ in 0..len {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            pixels,
            width,
            height,
        }
    }
}

impl std::fmt::Debug for RawBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Pixel payload of a cached page
#[derive(Clone, Debug)]
pub enum PageImage {
    Raw(RawBitmap),
    /// An encoded image (PNG, JPEG) that still has to be decoded
    Encoded(Vec<u8>),
}

/// A page render stored in the page cache
#[derive(Clone, Debug)]
pub struct RenderedPage {
    /// Page number (1-based)
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    pub image: PageImage,
    pub tier: QualityTier,
    /// Linear multiplier on the page's native point size
    pub scale: f32,
}

impl RenderedPage {
    #[must_use]
    pub fn from_bitmap(page_number: u32, tier: QualityTier, scale: f32, bitmap: RawBitmap) -> Self {
        Self {
            page_number,
            width: bitmap.width,
            height: bitmap.height,
            image: PageImage::Raw(bitmap),
            tier,
            scale,
        }
    }
}
