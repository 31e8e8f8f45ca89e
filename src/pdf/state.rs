//! Viewer session state management
//!
//! [`ViewerState::apply`] is a pure reducer: it updates the state and
//! returns the effects the session has to carry out. No I/O happens here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::notification::Notification;
use crate::watermark::WatermarkedPage;

use super::types::QualityTier;

const ENHANCED_NOTICE: &str = "Enhanced quality loaded";
const ERROR_NOTICE_DURATION: Duration = Duration::from_secs(5);

/// Lifecycle of one document view
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Opening the document and reading its page count
    Initializing,
    Ready,
    /// Terminal until the consumer asks for a reset
    OpenFailed { reason: String },
    Closed,
}

/// What the display shows for the current page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageView {
    Idle,
    /// Nothing cached yet for the page
    Loading,
    Ready(QualityTier),
    /// Sticky until reset
    Unavailable,
}

/// Notifications delivered to session subscribers
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Current state, sent first to every new subscriber
    Snapshot {
        phase: SessionPhase,
        current_page: u32,
        total_pages: u32,
        view: PageView,
    },
    Opened {
        total_pages: u32,
    },
    OpenFailed {
        reason: String,
    },
    PageLoading {
        page: u32,
    },
    PageReady {
        page: u32,
        tier: QualityTier,
        image: Arc<WatermarkedPage>,
    },
    PageUnavailable {
        page: u32,
    },
    /// The current page was upgraded to final quality
    Enhanced {
        page: u32,
        notice: Notification,
    },
    Closed,
}

/// Inputs to the reducer
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Opened {
        total_pages: u32,
    },
    OpenFailed {
        reason: String,
    },
    /// Navigate, with what the render service already knows about the page
    GoToPage {
        page: u32,
        cached: Option<QualityTier>,
        failed: bool,
    },
    PageRendered {
        page: u32,
        tier: QualityTier,
    },
    PageUnavailable {
        page: u32,
    },
    /// The tier picked for display was no longer cached when it was
    /// composited, e.g. a final upgrade replaced the preview meanwhile
    DisplayMissed {
        page: u32,
        tier: QualityTier,
    },
    /// Clear failures and cache, or retry a failed open
    Reset,
    Close,
}

/// Work requested by the reducer
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Ask the render service for a page
    EnsurePage(u32),
    /// Watermark the cached tier of a page and hand it to subscribers
    Display { page: u32, tier: QualityTier },
    Emit(SessionEvent),
    /// Clear the render cache and failed pages
    ResetRenderer,
    /// Run the document open again
    Reopen,
    CancelInFlight,
}

/// Current state of a viewer session
#[derive(Clone, Debug)]
pub struct ViewerState {
    pub phase: SessionPhase,

    /// Current page (1-based)
    pub current_page: u32,

    /// Authoritative page count, 0 until opened
    pub total_pages: u32,

    pub view: PageView,

    /// Most recent user-facing notice, expiring on its own
    pub notice: Option<Notification>,

    notice_duration: Duration,
}

impl ViewerState {
    #[must_use]
    pub fn new(notice_duration: Duration) -> Self {
        Self {
            phase: SessionPhase::Initializing,
            current_page: 1,
            total_pages: 0,
            view: PageView::Idle,
            notice: None,
            notice_duration,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        if self.phase == SessionPhase::Closed {
            return vec![];
        }

        match cmd {
            Command::Opened { total_pages } => {
                if self.phase != SessionPhase::Initializing {
                    return vec![];
                }
                self.phase = SessionPhase::Ready;
                self.total_pages = total_pages;
                self.current_page = self.clamp(self.current_page);
                self.view = PageView::Loading;
                vec![
                    Effect::Emit(SessionEvent::Opened { total_pages }),
                    Effect::Emit(SessionEvent::PageLoading {
                        page: self.current_page,
                    }),
                    Effect::EnsurePage(self.current_page),
                ]
            }

            Command::OpenFailed { reason } => {
                if self.phase != SessionPhase::Initializing {
                    return vec![];
                }
                self.notice = Some(Notification::error(
                    format!("Unable to open document: {reason}"),
                    ERROR_NOTICE_DURATION,
                ));
                self.phase = SessionPhase::OpenFailed {
                    reason: reason.clone(),
                };
                vec![Effect::Emit(SessionEvent::OpenFailed { reason })]
            }

            Command::GoToPage {
                page,
                cached,
                failed,
            } => {
                if self.phase != SessionPhase::Ready {
                    return vec![];
                }
                let page = self.clamp(page);
                if page == self.current_page && !self.needs_refresh(cached, failed) {
                    return vec![];
                }
                self.current_page = page;

                if failed {
                    self.view = PageView::Unavailable;
                    return vec![Effect::Emit(SessionEvent::PageUnavailable { page })];
                }
                match cached {
                    Some(tier) => {
                        self.view = PageView::Ready(tier);
                        vec![Effect::Display { page, tier }]
                    }
                    None => {
                        self.view = PageView::Loading;
                        vec![
                            Effect::Emit(SessionEvent::PageLoading { page }),
                            Effect::EnsurePage(page),
                        ]
                    }
                }
            }

            Command::PageRendered { page, tier } => {
                if self.phase != SessionPhase::Ready || page != self.current_page {
                    return vec![];
                }
                match (self.view, tier) {
                    (PageView::Ready(QualityTier::Preview), QualityTier::Final) => {
                        let notice = Notification::info(ENHANCED_NOTICE, self.notice_duration);
                        self.notice = Some(notice.clone());
                        self.view = PageView::Ready(QualityTier::Final);
                        vec![
                            Effect::Display { page, tier },
                            Effect::Emit(SessionEvent::Enhanced { page, notice }),
                        ]
                    }
                    (PageView::Loading | PageView::Idle, _) => {
                        self.view = PageView::Ready(tier);
                        vec![Effect::Display { page, tier }]
                    }
                    // Never step back from final, never redisplay the same tier.
                    (PageView::Ready(_) | PageView::Unavailable, _) => vec![],
                }
            }

            Command::PageUnavailable { page } => {
                if self.phase != SessionPhase::Ready
                    || page != self.current_page
                    || self.view == PageView::Unavailable
                {
                    return vec![];
                }
                self.view = PageView::Unavailable;
                self.notice = Some(Notification::warning(
                    format!("Page {page} could not be displayed"),
                    ERROR_NOTICE_DURATION,
                ));
                vec![Effect::Emit(SessionEvent::PageUnavailable { page })]
            }

            Command::DisplayMissed { page, tier } => {
                if !self.is_showing(page, tier) {
                    return vec![];
                }
                // Ask again; the service answers with whatever tier it holds.
                self.view = PageView::Loading;
                vec![
                    Effect::Emit(SessionEvent::PageLoading { page }),
                    Effect::EnsurePage(page),
                ]
            }

            Command::Reset => match self.phase {
                SessionPhase::OpenFailed { .. } => {
                    self.phase = SessionPhase::Initializing;
                    self.view = PageView::Idle;
                    self.notice = None;
                    vec![Effect::Reopen]
                }
                SessionPhase::Ready => {
                    self.view = PageView::Loading;
                    self.notice = None;
                    vec![
                        Effect::ResetRenderer,
                        Effect::Emit(SessionEvent::PageLoading {
                            page: self.current_page,
                        }),
                        Effect::EnsurePage(self.current_page),
                    ]
                }
                SessionPhase::Initializing | SessionPhase::Closed => vec![],
            },

            Command::Close => {
                self.phase = SessionPhase::Closed;
                self.view = PageView::Idle;
                vec![Effect::CancelInFlight, Effect::Emit(SessionEvent::Closed)]
            }
        }
    }

    /// Clamp a requested page to `[1, total_pages]`
    #[must_use]
    pub fn clamp(&self, page: u32) -> u32 {
        page.clamp(1, self.total_pages.max(1))
    }

    fn needs_refresh(&self, cached: Option<QualityTier>, failed: bool) -> bool {
        match self.view {
            PageView::Loading => false,
            PageView::Unavailable => !failed,
            PageView::Ready(tier) => failed || cached.is_some_and(|c| c > tier),
            PageView::Idle => true,
        }
    }

    /// Whether `tier` of `page` is what the display should currently show
    #[must_use]
    pub fn is_showing(&self, page: u32, tier: QualityTier) -> bool {
        self.phase == SessionPhase::Ready
            && self.current_page == page
            && self.view == PageView::Ready(tier)
    }

    /// The "enhanced quality" notice, if it is still live at `now`
    #[must_use]
    pub fn enhancement_active(&self, now: Instant) -> Option<&Notification> {
        self.notice
            .as_ref()
            .filter(|n| n.message == ENHANCED_NOTICE && !n.is_expired_at(now))
    }

    /// Drop the notice once it has expired. Returns true if one was removed.
    pub fn clear_expired_notice(&mut self, now: Instant) -> bool {
        if self.notice.as_ref().is_some_and(|n| n.is_expired_at(now)) {
            self.notice = None;
            return true;
        }
        false
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionEvent {
        SessionEvent::Snapshot {
            phase: self.phase.clone(),
            current_page: self.current_page,
            total_pages: self.total_pages,
            view: self.view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_state(total_pages: u32) -> ViewerState {
        let mut state = ViewerState::new(Duration::from_secs(2));
        let _ = state.apply(Command::Opened { total_pages });
        state
    }

    fn go(page: u32) -> Command {
        Command::GoToPage {
            page,
            cached: None,
            failed: false,
        }
    }

    #[test]
    fn opened_loads_the_current_page() {
        let mut state = ViewerState::new(Duration::from_secs(2));
        let effects = state.apply(Command::Opened { total_pages: 3 });

        assert_eq!(state.phase, SessionPhase::Ready);
        assert_eq!(state.view, PageView::Loading);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(SessionEvent::Opened { total_pages: 3 }),
                Effect::Emit(SessionEvent::PageLoading { page: 1 }),
                Effect::EnsurePage(1),
            ]
        );
    }

    #[test]
    fn open_failure_is_terminal_until_reset() {
        let mut state = ViewerState::new(Duration::from_secs(2));
        let effects = state.apply(Command::OpenFailed {
            reason: "bad xref".into(),
        });
        assert_eq!(
            effects,
            vec![Effect::Emit(SessionEvent::OpenFailed {
                reason: "bad xref".into()
            })]
        );
        assert!(state.apply(go(2)).is_empty());
        assert!(state.apply(Command::Opened { total_pages: 3 }).is_empty());

        assert_eq!(state.apply(Command::Reset), vec![Effect::Reopen]);
        assert_eq!(state.phase, SessionPhase::Initializing);
    }

    #[test]
    fn go_to_page_clamps_into_range() {
        let mut state = ready_state(3);

        let _ = state.apply(go(0));
        assert_eq!(state.current_page, 1);

        let effects = state.apply(go(4));
        assert_eq!(state.current_page, 3);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(SessionEvent::PageLoading { page: 3 }),
                Effect::EnsurePage(3),
            ]
        );
    }

    #[test]
    fn cached_preview_is_ready_immediately() {
        let mut state = ready_state(3);
        let effects = state.apply(Command::GoToPage {
            page: 2,
            cached: Some(QualityTier::Preview),
            failed: false,
        });

        assert_eq!(state.view, PageView::Ready(QualityTier::Preview));
        assert_eq!(
            effects,
            vec![Effect::Display {
                page: 2,
                tier: QualityTier::Preview
            }]
        );
    }

    #[test]
    fn upgrade_landing_during_navigation_still_shows_the_page() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Preview,
        });

        // Page 2's final arrives while page 1 is current and is ignored.
        assert!(
            state
                .apply(Command::PageRendered {
                    page: 2,
                    tier: QualityTier::Final
                })
                .is_empty()
        );

        // Navigation still saw the preview that the final has since replaced.
        let effects = state.apply(Command::GoToPage {
            page: 2,
            cached: Some(QualityTier::Preview),
            failed: false,
        });
        assert_eq!(
            effects,
            vec![Effect::Display {
                page: 2,
                tier: QualityTier::Preview
            }]
        );

        let effects = state.apply(Command::DisplayMissed {
            page: 2,
            tier: QualityTier::Preview,
        });
        assert_eq!(state.view, PageView::Loading);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(SessionEvent::PageLoading { page: 2 }),
                Effect::EnsurePage(2),
            ]
        );

        let effects = state.apply(Command::PageRendered {
            page: 2,
            tier: QualityTier::Final,
        });
        assert_eq!(state.view, PageView::Ready(QualityTier::Final));
        assert_eq!(
            effects,
            vec![Effect::Display {
                page: 2,
                tier: QualityTier::Final
            }]
        );
    }

    #[test]
    fn stale_display_miss_is_ignored() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Final,
        });

        let missed_preview = Command::DisplayMissed {
            page: 1,
            tier: QualityTier::Preview,
        };
        assert!(state.apply(missed_preview).is_empty());
        assert!(
            state
                .apply(Command::DisplayMissed {
                    page: 2,
                    tier: QualityTier::Final
                })
                .is_empty()
        );
        assert_eq!(state.view, PageView::Ready(QualityTier::Final));
    }

    #[test]
    fn failed_page_is_unavailable_without_rendering() {
        let mut state = ready_state(3);
        let effects = state.apply(Command::GoToPage {
            page: 2,
            cached: None,
            failed: true,
        });

        assert_eq!(state.view, PageView::Unavailable);
        assert_eq!(
            effects,
            vec![Effect::Emit(SessionEvent::PageUnavailable { page: 2 })]
        );
    }

    #[test]
    fn final_over_preview_raises_enhanced_notice() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Preview,
        });
        let effects = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Final,
        });

        assert_eq!(state.view, PageView::Ready(QualityTier::Final));
        assert_eq!(effects.len(), 2);
        assert_eq!(
            effects[0],
            Effect::Display {
                page: 1,
                tier: QualityTier::Final
            }
        );
        assert!(matches!(
            &effects[1],
            Effect::Emit(SessionEvent::Enhanced { page: 1, .. })
        ));

        let now = Instant::now();
        assert!(state.enhancement_active(now).is_some());
        assert!(state.enhancement_active(now + Duration::from_secs(3)).is_none());
        assert!(state.clear_expired_notice(now + Duration::from_secs(3)));
        assert!(state.notice.is_none());
    }

    #[test]
    fn preview_never_replaces_final() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Final,
        });
        let effects = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Preview,
        });

        assert!(effects.is_empty());
        assert_eq!(state.view, PageView::Ready(QualityTier::Final));
    }

    #[test]
    fn events_for_other_pages_are_ignored() {
        let mut state = ready_state(3);
        let _ = state.apply(go(2));

        assert!(
            state
                .apply(Command::PageRendered {
                    page: 1,
                    tier: QualityTier::Final
                })
                .is_empty()
        );
        assert!(state.apply(Command::PageUnavailable { page: 3 }).is_empty());
        assert_eq!(state.view, PageView::Loading);
    }

    #[test]
    fn revisiting_the_same_page_is_a_no_op() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageRendered {
            page: 1,
            tier: QualityTier::Final,
        });

        let effects = state.apply(Command::GoToPage {
            page: 1,
            cached: Some(QualityTier::Final),
            failed: false,
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn reset_clears_renderer_and_reloads() {
        let mut state = ready_state(3);
        let _ = state.apply(Command::PageUnavailable { page: 1 });
        assert!(state.notice.is_some());

        let effects = state.apply(Command::Reset);
        assert_eq!(state.view, PageView::Loading);
        assert!(state.notice.is_none());
        assert_eq!(
            effects,
            vec![
                Effect::ResetRenderer,
                Effect::Emit(SessionEvent::PageLoading { page: 1 }),
                Effect::EnsurePage(1),
            ]
        );
    }

    #[test]
    fn closed_ignores_everything() {
        let mut state = ready_state(3);
        assert_eq!(
            state.apply(Command::Close),
            vec![Effect::CancelInFlight, Effect::Emit(SessionEvent::Closed)]
        );

        assert!(state.apply(go(2)).is_empty());
        assert!(state.apply(Command::Reset).is_empty());
        assert!(state.apply(Command::Close).is_empty());
        assert_eq!(state.phase, SessionPhase::Closed);
    }
}
