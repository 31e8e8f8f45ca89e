// Export modules for use in tests
pub mod notification;
pub mod panic_handler;
pub mod pdf;
pub mod settings;
pub mod surface;
pub mod watermark;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use pdf::{
    DocumentRef, DocumentSource, PageView, QualityTier, RenderConfig, RenderError, SessionEvent,
    SessionPhase, ViewerSession,
};
pub use watermark::{Compositor, ViewerIdentity, WatermarkSpec, WatermarkedPage};
