//! Per-contact sliding-window send limiter.

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Length of the sliding window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sends allowed per contact within one window.
pub const RATE_LIMIT: usize = 5;

/// Sliding-window rate limiter keyed by contact name.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    limit: usize,
    sends: HashMap<String, VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_WINDOW, RATE_LIMIT)
    }
}

impl RateLimiter {
    /// Create a limiter allowing `limit` sends per `window`.
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            sends: HashMap::new(),
        }
    }

    /// Record a send to `contact` at `now`, or reject it.
    ///
    /// Entries older than the window are evicted first. A rejected send is
    /// not recorded.
    pub fn check(&mut self, contact: &str, now: Instant) -> Result<()> {
        let window = self.window;
        let sends = self.sends.entry(contact.to_string()).or_default();
        while let Some(&oldest) = sends.front() {
            if now.saturating_duration_since(oldest) > window {
                sends.pop_front();
            } else {
                break;
            }
        }

        if sends.len() >= self.limit {
            tracing::debug!(contact, "Rate limit exceeded");
            return Err(Error::RateLimitExceeded);
        }
        sends.push_back(now);
        Ok(())
    }

    /// Sends to `contact` currently inside the window as of the last check.
    pub fn in_window(&self, contact: &str) -> usize {
        self.sends.get(contact).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixth_send_rejected() {
        let mut limiter = RateLimiter::default();
        let start = Instant::now();

        for i in 0..5 {
            limiter
                .check("bob", start + Duration::from_secs(i))
                .expect("within limit");
        }
        assert!(matches!(
            limiter.check("bob", start + Duration::from_secs(5)),
            Err(Error::RateLimitExceeded)
        ));
        assert_eq!(limiter.in_window("bob"), 5);
    }

    #[test]
    fn test_allowed_after_window() {
        let mut limiter = RateLimiter::default();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.check("bob", start).expect("within limit");
        }
        assert!(limiter.check("bob", start + Duration::from_secs(30)).is_err());
        limiter
            .check("bob", start + Duration::from_secs(61))
            .expect("window expired");
        assert_eq!(limiter.in_window("bob"), 1);
    }

    #[test]
    fn test_contacts_are_independent() {
        let mut limiter = RateLimiter::new(RATE_WINDOW, 1);
        let now = Instant::now();

        limiter.check("bob", now).expect("bob");
        limiter.check("carol", now).expect("carol");
        assert!(limiter.check("bob", now).is_err());
    }
}
