//! Per-session sliding-window limits on routed messages.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use switchyard_core::SessionId;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Messages allowed per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Within any one-second window.
    pub per_second: u32,
    /// Within any sixty-second window.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 10,
            per_minute: 100,
        }
    }
}

/// Sliding-window limiter keyed by session.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<SessionId, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Empty limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Record a message at `now` if both windows have room.
    ///
    /// Rejected messages are not recorded.
    pub fn check_and_record(&mut self, session_id: &SessionId, now: Instant) -> bool {
        let window = self.windows.entry(session_id.clone()).or_default();

        while window
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= MINUTE)
        {
            let _ = window.pop_front();
        }

        let last_second = window
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < SECOND)
            .count();

        if last_second >= self.config.per_second as usize
            || window.len() >= self.config.per_minute as usize
        {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Discard a session's window.
    pub fn forget(&mut self, session_id: &SessionId) {
        let _ = self.windows.remove(session_id);
    }

    /// Number of sessions with a live window.
    pub fn tracked_sessions(&self) -> usize {
        self.windows.len()
    }

    /// Discard every window.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
