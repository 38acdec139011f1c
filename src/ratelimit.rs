//! Fixed-window rate limiting for outbound platform calls.
//!
//! One limiter per `{user_id}-{platform}`. A caller that finds the window
//! exhausted waits until it resets. Waiters queue on a fair async mutex, so
//! they are admitted in arrival order rather than all re-polling together.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::platform::{account_key, Platform};

#[derive(Debug)]
struct RateLimitState {
    requests: u32,
    reset_time: Instant,
}

impl RateLimitState {
    /// Start a fresh window once `now` has passed `reset_time`.
    fn roll(&mut self, now: Instant, window: Duration) {
        if now > self.reset_time {
            self.requests = 0;
            self.reset_time = now + window;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<RateLimitState>,
    // tokio's Mutex is FIFO, holding it makes later callers queue behind a sleeper
    queue: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(RateLimitState {
                requests: 0,
                reset_time: Instant::now() + window,
            }),
            queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Count one request, waiting for the window to reset if it is exhausted.
    pub async fn check_limit(&self) {
        let _turn = self.queue.lock().await;

        let wait_until = {
            let mut state = self.state.lock();
            state.roll(Instant::now(), self.window);
            if state.requests < self.max_requests {
                state.requests += 1;
                return;
            }
            state.reset_time
        };

        debug!(
            wait_ms = wait_until.saturating_duration_since(Instant::now()).as_millis() as u64,
            "rate limit exhausted, waiting for window reset"
        );
        tokio::time::sleep_until(wait_until).await;

        let mut state = self.state.lock();
        state.requests = 1;
        state.reset_time = Instant::now() + self.window;
    }

    /// Requests left in the current window.
    pub fn remaining_requests(&self) -> u32 {
        let mut state = self.state.lock();
        state.roll(Instant::now(), self.window);
        self.max_requests.saturating_sub(state.requests)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

/// Quota applied per connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Published per-user quotas, rounded down.
    pub fn default_for(platform: Platform) -> Self {
        match platform {
            Platform::Twitter => Self::new(300, 15 * 60),
            Platform::Facebook | Platform::Instagram => Self::new(200, 3600),
            Platform::LinkedIn => Self::new(100, 24 * 3600),
            Platform::YouTube => Self::new(100, 100),
        }
    }
}

/// Lazily created limiters keyed by `{user_id}-{platform}`.
#[derive(Default)]
pub struct RateLimiterRegistry {
    overrides: HashMap<Platform, RateLimit>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default quota for a platform.
    pub fn with_limit(mut self, platform: Platform, limit: RateLimit) -> Self {
        self.overrides.insert(platform, limit);
        self
    }

    pub fn limit_for(&self, platform: Platform) -> RateLimit {
        self.overrides
            .get(&platform)
            .copied()
            .unwrap_or_else(|| RateLimit::default_for(platform))
    }

    pub fn for_account(&self, user_id: &str, platform: Platform) -> Arc<RateLimiter> {
        let key = account_key(user_id, platform);
        let limit = self.limit_for(platform);
        self.limiters
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(RateLimiter::new(limit.max_requests, limit.window)))
            .clone()
    }

    /// Drop the account's limiter. Returns whether one existed.
    pub fn forget(&self, user_id: &str, platform: Platform) -> bool {
        self.limiters
            .lock()
            .remove(&account_key(user_id, platform))
            .is_some()
    }

    /// Remaining requests for an account; untouched accounts report the full quota.
    pub fn remaining(&self, user_id: &str, platform: Platform) -> u32 {
        let key = account_key(user_id, platform);
        match self.limiters.lock().get(&key) {
            Some(limiter) => limiter.remaining_requests(),
            None => self.limit_for(platform).max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhausted_window_delays_next_call_until_reset() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(10)));
        limiter.check_limit().await;
        limiter.check_limit().await;
        assert_eq!(limiter.remaining_requests(), 0);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_limit().await })
        };

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(limiter.remaining_requests(), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        waiter.await.unwrap();
        assert_eq!(limiter.remaining_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_resets_after_window_rolls_over() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.check_limit().await;
        }
        assert_eq!(limiter.remaining_requests(), 0);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(limiter.remaining_requests(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_admitted_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1)));
        limiter.check_limit().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_limit().await;
                order.lock().push(i);
            }));
            // make sure each task is queued before the next is spawned
            tokio::task::yield_now().await;
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn registry_reports_full_quota_for_unused_accounts() {
        let registry = RateLimiterRegistry::new()
            .with_limit(Platform::Twitter, RateLimit::new(5, 60));
        assert_eq!(registry.remaining("u1", Platform::Twitter), 5);
        assert_eq!(registry.remaining("u1", Platform::YouTube), 100);
    }

    #[tokio::test]
    async fn registry_shares_limiter_per_account() {
        let registry = RateLimiterRegistry::new()
            .with_limit(Platform::LinkedIn, RateLimit::new(5, 60));
        registry.for_account("u1", Platform::LinkedIn).check_limit().await;
        registry.for_account("u1", Platform::LinkedIn).check_limit().await;

        assert_eq!(registry.remaining("u1", Platform::LinkedIn), 3);
        assert_eq!(registry.remaining("u2", Platform::LinkedIn), 5);
    }

    #[tokio::test]
    async fn forgotten_account_starts_from_a_fresh_limiter() {
        let registry = RateLimiterRegistry::new()
            .with_limit(Platform::Facebook, RateLimit::new(2, 3600));
        registry.for_account("u1", Platform::Facebook).check_limit().await;
        registry.for_account("u1", Platform::Facebook).check_limit().await;
        assert_eq!(registry.remaining("u1", Platform::Facebook), 0);

        assert!(registry.forget("u1", Platform::Facebook));
        assert!(!registry.forget("u1", Platform::Facebook));
        assert!(registry.limiters.lock().is_empty());
        assert_eq!(registry.remaining("u1", Platform::Facebook), 2);
    }
}
