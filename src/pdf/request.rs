//! Render request and error types

use flume::Sender;

use super::cancel::CancelToken;
use super::types::{QualityTier, RawBitmap, Smoothing};

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reply channel paired with every render request
pub type RenderReply = Sender<Result<RawBitmap, RenderError>>;

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render one page (1-based) at the given scale
    Page {
        id: RequestId,
        page: u32,
        scale: f32,
        smoothing: Smoothing,
        cancel: CancelToken,
        reply: RenderReply,
    },

    /// Shutdown the worker
    Shutdown,
}

/// Document metadata reported by a worker once its document is open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocumentInfo {
    pub page_count: u32,
}

/// Failures of the open/render pipeline
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("document unreadable: {detail}")]
    SourceUnreadable { detail: String },

    #[error("timed out reading document metadata")]
    MetadataTimeout,

    #[error("page {page} is outside 1..={page_count}")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("{tier} render of page {page} timed out")]
    RenderTimeout { page: u32, tier: QualityTier },

    #[error("render of page {page} failed: {detail}")]
    RenderFailure { page: u32, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("render workers are gone")]
    WorkerGone,
}

impl RenderError {
    pub fn unreadable(msg: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            detail: msg.into(),
        }
    }

    pub fn failure(page: u32, msg: impl Into<String>) -> Self {
        Self::RenderFailure {
            page,
            detail: msg.into(),
        }
    }

    /// Fatal for the whole session rather than a single page
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SourceUnreadable { .. } | Self::MetadataTimeout)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_fatal_classification() {
        assert!(RenderError::unreadable("bad xref").is_session_fatal());
        assert!(RenderError::MetadataTimeout.is_session_fatal());
        assert!(!RenderError::Cancelled.is_session_fatal());
        assert!(
            !RenderError::RenderTimeout {
                page: 1,
                tier: QualityTier::Final
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn error_messages_name_the_page() {
        let err = RenderError::failure(7, "corrupt stream");
        assert_eq!(err.to_string(), "render of page 7 failed: corrupt stream");

        let err = RenderError::RenderTimeout {
            page: 3,
            tier: QualityTier::Preview,
        };
        assert_eq!(err.to_string(), "preview render of page 3 timed out");
    }
}
