use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::errors::AppError;

#[derive(Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// In-memory fixed-window rate limiter keyed by caller identity
/// (user id for authenticated calls, client address otherwise).
///
/// A `max_requests` of 0 disables limiting.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window: Duration::from_secs(window_secs.max(1)),
        }
    }

    /// Count one request for `key`, failing once the window is full.
    pub fn check(&self, key: &str) -> Result<u64, AppError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<u64, AppError> {
        if self.max_requests == 0 {
            return Ok(0);
        }
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        if entry.count > self.max_requests {
            tracing::warn!(
                key,
                limit = self.max_requests,
                count = entry.count,
                "rate limit exceeded"
            );
            return Err(AppError::RateLimitExceeded);
        }
        Ok(entry.count)
    }

    /// Drop windows that have fully elapsed.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }
}

/// Parse a window such as "30s", "1m", "1h", "1d" into seconds.
/// Unparseable input falls back to one minute.
pub fn parse_window(s: &str) -> u64 {
    let s = s.trim();
    if let Some(val) = s.strip_suffix('s') {
        val.parse().unwrap_or(60)
    } else if let Some(val) = s.strip_suffix('m') {
        val.parse::<u64>().map(|v| v * 60).unwrap_or(60)
    } else if let Some(val) = s.strip_suffix('h') {
        val.parse::<u64>().map(|v| v * 3600).unwrap_or(60)
    } else if let Some(val) = s.strip_suffix('d') {
        val.parse::<u64>().map(|v| v * 86400).unwrap_or(60)
    } else {
        s.parse().unwrap_or(60)
    }
}
