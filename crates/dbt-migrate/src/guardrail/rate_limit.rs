//! Sliding-window call limiter keyed by caller identity.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Per-key sliding-window limiter.
///
/// Each key keeps the timestamps of its recent calls. A call evicts the
/// timestamps that fell out of the window, is refused when the remaining count
/// has reached `limit`, and is recorded otherwise. Refused calls are not
/// recorded, so a blocked caller is not pushed further into the future.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    calls: HashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: HashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a call for `key` at `now`. Returns false when the call is refused.
    pub fn check_at(&mut self, key: &str, now: Instant) -> bool {
        let window = self.window;
        let recent = self.calls.entry(key.to_string()).or_default();
        while let Some(oldest) = recent.front() {
            if now.saturating_duration_since(*oldest) >= window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() >= self.limit {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Record a call for `key` now.
    pub fn check(&mut self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Calls currently counted against `key`.
    pub fn in_window(&self, key: &str) -> usize {
        self.calls.get(key).map(VecDeque::len).unwrap_or(0)
    }
}
