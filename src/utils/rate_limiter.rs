use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tokio::time::{Instant, sleep_until};

/// Paces requests to a rate-limited endpoint.
///
/// Caps the number of in-flight requests and spaces request starts by an
/// interval that widens when the endpoint pushes back and relaxes again
/// while requests succeed.
pub struct RateLimiter {
    semaphore: Semaphore,
    base_interval: Duration,
    max_interval: Duration,
    state: Mutex<PacingState>,
}

struct PacingState {
    interval: Duration,
    next_slot: Instant,
}

impl RateLimiter {
    pub fn new(max_concurrent_requests: usize, requests_per_second: u32) -> Self {
        let base_interval = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / requests_per_second
        };

        Self {
            semaphore: Semaphore::new(max_concurrent_requests.max(1)),
            base_interval,
            max_interval: (base_interval * 16).max(Duration::from_secs(1)),
            state: Mutex::new(PacingState {
                interval: base_interval,
                next_slot: Instant::now(),
            }),
        }
    }

    /// Waits for a concurrency slot and then for the next pacing slot.
    /// The returned permit holds the concurrency slot until dropped.
    pub async fn acquire(&self) -> Result<RateLimitPermit<'_>, AcquireError> {
        let permit = self.semaphore.acquire().await?;

        let slot = {
            let mut state = self.lock_state();
            let now = Instant::now();
            let slot = state.next_slot.max(now);
            state.next_slot = slot + state.interval;
            slot
        };
        sleep_until(slot).await;

        Ok(RateLimitPermit {
            limiter: self,
            _permit: permit,
        })
    }

    /// Current spacing between request starts.
    pub fn current_interval(&self) -> Duration {
        self.lock_state().interval
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn record_result(&self, rate_limited: bool) {
        let mut state = self.lock_state();
        state.interval = if rate_limited {
            (state.interval * 2)
                .max(Duration::from_millis(50))
                .min(self.max_interval)
        } else {
            // Relax by 10% towards the configured pace
            (state.interval * 9 / 10).max(self.base_interval)
        };
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PacingState> {
        // The state holds plain values, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Permission to make one request.
pub struct RateLimitPermit<'a> {
    limiter: &'a RateLimiter,
    _permit: SemaphorePermit<'a>,
}

impl RateLimitPermit<'_> {
    /// Feeds the outcome of the request back into the pacing interval.
    pub fn record_result(self, rate_limited: bool) {
        self.limiter.record_result(rate_limited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_caps_concurrency() {
        let limiter = RateLimiter::new(2, 0);

        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        drop(first);
        assert_eq!(limiter.available_permits(), 1);
        let _third = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(4, 50); // 20ms spacing
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await.unwrap().record_result(false);
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_rate_limiter_backs_off_and_recovers() {
        let limiter = RateLimiter::new(1, 10);
        let base = limiter.current_interval();
        assert_eq!(base, Duration::from_millis(100));

        limiter.acquire().await.unwrap().record_result(true);
        assert_eq!(limiter.current_interval(), Duration::from_millis(200));

        for _ in 0..20 {
            limiter.record_result(false);
        }
        assert_eq!(limiter.current_interval(), base);
    }
}
