//! Session-wide cancellation signal and the timeout race used by every
//! rasterizer call.
//!
//! The signal is a channel that never carries a message: cancelling drops the
//! only sender, which disconnects every cloned receiver at once. Anything
//! blocked on a token (a render reply, a pacing delay) wakes immediately.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};

use super::request::RenderError;

/// Owner side of the signal; one per session
#[derive(Debug)]
pub struct CancelSource {
    trigger: Mutex<Option<Sender<()>>>,
    token: CancelToken,
}

/// Cheap, clonable observer of a [`CancelSource`]
#[derive(Clone, Debug)]
pub struct CancelToken {
    signal: Receiver<()>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = flume::bounded(1);
        Self {
            trigger: Mutex::new(Some(trigger)),
            token: CancelToken { signal },
        }
    }

    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl CancelToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_disconnected()
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        matches!(
            self.signal.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Wait for `reply`, the deadline, or cancellation, whichever comes first.
///
/// Cancellation wins over a reply that arrives at the same moment, and a
/// dropped reply channel means the worker died mid-request.
pub fn race<T>(
    reply: &Receiver<Result<T, RenderError>>,
    cancel: &CancelToken,
    timeout: Duration,
    on_timeout: RenderError,
) -> Result<T, RenderError> {
    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let deadline = Instant::now() + timeout;
    let outcome = flume::Selector::new()
        .recv(reply, |msg| match msg {
            Ok(result) => result,
            Err(_) => Err(RenderError::WorkerGone),
        })
        .recv(cancel.signal(), |_| Err(RenderError::Cancelled))
        .wait_deadline(deadline)
        .unwrap_or(Err(on_timeout));

    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }
    outcome
}
