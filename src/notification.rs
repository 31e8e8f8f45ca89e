use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A transient user-facing notice that carries its own expiry.
///
/// The viewer never clears notices itself; consumers poll
/// [`is_expired`](Self::is_expired) and drop them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Notification {
    pub fn new(message: impl Into<String>, level: NotificationLevel, duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            message: message.into(),
            level,
            created_at: now,
            expires_at: now + duration,
        }
    }

    pub fn info(message: impl Into<String>, duration: Duration) -> Self {
        Self::new(message, NotificationLevel::Info, duration)
    }

    pub fn warning(message: impl Into<String>, duration: Duration) -> Self {
        Self::new(message, NotificationLevel::Warning, duration)
    }

    pub fn error(message: impl Into<String>, duration: Duration) -> Self {
        Self::new(message, NotificationLevel::Error, duration)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_expires_after_its_duration() {
        let notice = Notification::info("Enhanced quality loaded", Duration::from_secs(2));
        assert_eq!(notice.level, NotificationLevel::Info);
        assert!(!notice.is_expired());
        assert!(notice.time_remaining() <= Duration::from_secs(2));
        assert!(notice.is_expired_at(notice.created_at + Duration::from_secs(2)));
        assert!(!notice.is_expired_at(notice.created_at + Duration::from_millis(1999)));
    }

    #[test]
    fn zero_duration_is_expired_immediately() {
        let notice = Notification::error("gone", Duration::ZERO);
        assert!(notice.is_expired());
        assert_eq!(notice.time_remaining(), Duration::ZERO);
    }
}
