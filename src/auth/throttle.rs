// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sliding-window login throttle.
//!
//! Each attempt reserves a slot for the key (normalized email, or client IP
//! when no email was submitted). A successful login gives its slot back, so
//! only failures count toward the limit.
//!
//! State is process-local and bounded by an LRU of keys. Running several
//! instances multiplies the effective limit; there is no shared store.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use crate::clock::Clock;
use crate::error::ApiError;
use crate::storage::normalize_email;

pub const MAX_ATTEMPTS: usize = 5;
pub const WINDOW_MINUTES: i64 = 15;
const MAX_TRACKED_KEYS: usize = 10_000;

/// Reservation handed out by [`LoginThrottle::try_acquire`].
#[derive(Debug)]
#[must_use = "release the permit on a successful login"]
pub struct ThrottlePermit {
    key: String,
    at: DateTime<Utc>,
}

pub struct LoginThrottle {
    attempts: Mutex<LruCache<String, VecDeque<DateTime<Utc>>>>,
    max_attempts: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl LoginThrottle {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, MAX_ATTEMPTS, Duration::minutes(WINDOW_MINUTES), MAX_TRACKED_KEYS)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, max_attempts: usize, window: Duration, capacity: usize) -> Self {
        Self {
            attempts: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            max_attempts,
            window,
            clock,
        }
    }

    /// Throttle key for a login attempt.
    pub fn key_for(email: Option<&str>, client_ip: &str) -> String {
        match email.map(normalize_email).filter(|e| !e.is_empty()) {
            Some(email) => format!("email:{email}"),
            None => format!("ip:{client_ip}"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, VecDeque<DateTime<Utc>>>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check and reserve one attempt for `key` in a single critical section.
    pub fn try_acquire(&self, key: &str) -> Result<ThrottlePermit, ApiError> {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut attempts = self.lock();
        let window = attempts.get_or_insert_mut(key.to_string(), VecDeque::new);
        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.max_attempts {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = (oldest + self.window - now).num_seconds().max(1) as u64;
            tracing::warn!(key, attempts = window.len(), "Login throttled");
            return Err(ApiError::too_many_requests(
                format!(
                    "Too many login attempts. Try again in {} minutes.",
                    self.window.num_minutes()
                ),
                retry_after,
            ));
        }

        window.push_back(now);
        Ok(ThrottlePermit {
            key: key.to_string(),
            at: now,
        })
    }

    /// Return the slot of a successful attempt.
    pub fn release(&self, permit: ThrottlePermit) {
        let mut attempts = self.lock();
        if let Some(window) = attempts.get_mut(&permit.key) {
            if let Some(pos) = window.iter().position(|t| *t == permit.at) {
                window.remove(pos);
            }
            if window.is_empty() {
                attempts.pop(&permit.key);
            }
        }
    }

    /// Attempts currently counted for `key`.
    pub fn attempts(&self, key: &str) -> usize {
        let cutoff = self.clock.now() - self.window;
        self.lock()
            .peek(key)
            .map(|w| w.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;

    fn throttle() -> (LoginThrottle, Arc<ManualClock>) {
        let clock = ManualClock::new(Utc::now());
        (LoginThrottle::new(clock.clone()), clock)
    }

    #[test]
    fn sixth_failure_is_rejected() {
        let (throttle, _clock) = throttle();
        for _ in 0..MAX_ATTEMPTS {
            let _failed = throttle.try_acquire("email:ana@example.com").unwrap();
        }
        let err = throttle.try_acquire("email:ana@example.com").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooManyRequests);
        assert!(err.message.contains("15 minutes"));

        // Other keys are unaffected
        assert!(throttle.try_acquire("email:beto@example.com").is_ok());
    }

    #[test]
    fn successes_do_not_consume_budget() {
        let (throttle, _clock) = throttle();
        for _ in 0..20 {
            let permit = throttle.try_acquire("email:ana@example.com").unwrap();
            throttle.release(permit);
        }
        assert_eq!(throttle.attempts("email:ana@example.com"), 0);
    }

    #[test]
    fn window_slides() {
        let (throttle, clock) = throttle();
        for _ in 0..MAX_ATTEMPTS {
            let _ = throttle.try_acquire("ip:10.0.0.1").unwrap();
            clock.advance(Duration::minutes(1));
        }
        assert!(throttle.try_acquire("ip:10.0.0.1").is_err());

        // The first attempt leaves the window 15 minutes after it was made
        clock.advance(Duration::minutes(WINDOW_MINUTES - MAX_ATTEMPTS as i64));
        assert!(throttle.try_acquire("ip:10.0.0.1").is_ok());
        assert!(throttle.try_acquire("ip:10.0.0.1").is_err());
    }

    #[test]
    fn key_prefers_normalized_email() {
        assert_eq!(
            LoginThrottle::key_for(Some(" Ana@Example.com "), "10.0.0.1"),
            "email:ana@example.com"
        );
        assert_eq!(LoginThrottle::key_for(Some("  "), "10.0.0.1"), "ip:10.0.0.1");
        assert_eq!(LoginThrottle::key_for(None, "10.0.0.1"), "ip:10.0.0.1");
    }

    #[test]
    fn key_count_is_bounded() {
        let clock = ManualClock::new(Utc::now());
        let throttle = LoginThrottle::with_limits(clock, 1, Duration::minutes(15), 2);
        let _ = throttle.try_acquire("a").unwrap();
        let _ = throttle.try_acquire("b").unwrap();
        let _ = throttle.try_acquire("c").unwrap();
        // "a" was evicted, so it starts fresh
        assert!(throttle.try_acquire("a").is_ok());
    }

    #[tokio::test]
    async fn concurrent_attempts_never_exceed_limit() {
        let (throttle, _clock) = throttle();
        let throttle = Arc::new(throttle);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move { throttle.try_acquire("email:x@example.com").is_ok() })
            })
            .collect();
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, MAX_ATTEMPTS);
    }
}
