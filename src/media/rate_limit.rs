//! Per-identity sliding-window rate limiter
//!
//! Each requester gets a time-ordered queue of admission timestamps. The
//! read-evict-append sequence runs under that requester's own lock, so two
//! concurrent requests can never both take the last free slot.

use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Upper bound on tracked identities
const MAX_TRACKED_IDENTITIES: u64 = 100_000;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was admitted and recorded
    Allowed,
    /// The window is full; nothing was recorded
    Rejected {
        /// Time until the oldest admission leaves the window
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Sliding-window limiter keyed by requester id
#[derive(Clone)]
pub struct RateLimiter {
    /// Idle windows expire after one full window, when they are empty anyway
    windows: Cache<i64, Window>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` requests per `window`
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_relay::media::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(5, Duration::from_secs(600));
    /// assert_eq!(limiter.limit(), 5);
    /// ```
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        let windows = Cache::builder()
            .max_capacity(MAX_TRACKED_IDENTITIES)
            .time_to_idle(window.max(Duration::from_secs(1)))
            .build();

        Self {
            windows,
            limit,
            window,
        }
    }

    /// Admit or reject a request from `identity` right now
    pub async fn admit(&self, identity: i64) -> bool {
        self.check(identity).await.is_allowed()
    }

    /// Like [`admit`](Self::admit), but reports how long to wait on rejection
    pub async fn check(&self, identity: i64) -> Admission {
        self.check_at(identity, Instant::now()).await
    }

    /// Admission check against an explicit clock reading
    pub async fn check_at(&self, identity: i64, now: Instant) -> Admission {
        let slot = self
            .windows
            .get_with(identity, async { Arc::new(Mutex::new(VecDeque::new())) })
            .await;
        let mut stamps = slot.lock().await;

        while let Some(&oldest) = stamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.limit {
            let retry_after = stamps.front().map_or(self.window, |&oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(oldest))
            });
            debug!(
                identity,
                in_window = stamps.len(),
                limit = self.limit,
                "Rate limit reached"
            );
            return Admission::Rejected { retry_after };
        }

        stamps.push_back(now);
        Admission::Allowed
    }

    /// Admissions currently counted for `identity` (entries may be stale until the next check)
    pub async fn recorded(&self, identity: i64) -> usize {
        match self.windows.get(&identity).await {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    /// Configured admissions per window
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();

        for i in 0..5 {
            let now = start + Duration::from_secs(i * 60);
            assert!(limiter.check_at(42, now).await.is_allowed());
        }

        // Sixth request at minute 9: still inside the window of the first
        let sixth = limiter
            .check_at(42, start + Duration::from_secs(540))
            .await;
        assert_eq!(
            sixth,
            Admission::Rejected {
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(limiter.recorded(42).await, 5);
    }

    #[tokio::test]
    async fn test_slot_frees_when_oldest_leaves_window() {
        let limiter = RateLimiter::new(2, WINDOW);
        let start = Instant::now();

        assert!(limiter.check_at(1, start).await.is_allowed());
        assert!(limiter
            .check_at(1, start + Duration::from_secs(100))
            .await
            .is_allowed());
        assert!(!limiter
            .check_at(1, start + Duration::from_secs(599))
            .await
            .is_allowed());
        assert!(limiter
            .check_at(1, start + Duration::from_secs(600))
            .await
            .is_allowed());
        // The second admission is still in the window
        assert!(!limiter
            .check_at(1, start + Duration::from_secs(650))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_rejection_is_not_recorded() {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();

        assert!(limiter.check_at(7, start).await.is_allowed());
        for i in 1..10 {
            assert!(!limiter
                .check_at(7, start + Duration::from_secs(i))
                .await
                .is_allowed());
        }
        assert_eq!(limiter.recorded(7).await, 1);
        assert!(limiter
            .check_at(7, start + WINDOW)
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = RateLimiter::new(1, WINDOW);

        assert!(limiter.admit(111).await);
        assert!(!limiter.admit(111).await);
        assert!(limiter.admit(222).await);
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(0, WINDOW);
        assert!(!limiter.admit(1).await);
        assert_eq!(limiter.recorded(1).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_exceed_limit() {
        let limiter = RateLimiter::new(3, WINDOW);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit(99).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap_or(false) {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(limiter.recorded(99).await, 3);
    }
}
