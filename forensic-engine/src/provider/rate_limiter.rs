//! Token bucket shared by every job that talks to the statement provider.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket rate limiter.
///
/// Holds at most one second's worth of requests and refills continuously at
/// `requests_per_minute / 60` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let per_minute = f64::from(requests_per_minute.max(1));
        let capacity = (per_minute / 60.0).ceil().max(1.0);

        Self {
            name: name.into(),
            capacity,
            refill_per_sec: per_minute / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token, waiting until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.take() {
                Ok(()) => return,
                Err(wait) => wait,
            };

            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Tokens currently available.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// `Err` carries how long until the next token.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - bucket.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        Err(wait.clamp(Duration::from_millis(5), Duration::from_secs(1)))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}

/// Limiter shared across jobs.
pub type SharedRateLimiter = Arc<RateLimiter>;

pub fn shared_limiter(name: impl Into<String>, requests_per_minute: u32) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_one_second_of_requests() {
        assert_eq!(RateLimiter::new("test", 300).capacity(), 5);
        assert_eq!(RateLimiter::new("test", 30).capacity(), 1);
    }

    #[test]
    fn test_try_acquire_exhausts_bucket() {
        let limiter = RateLimiter::new("test", 60);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("test", 6000);
        while limiter.try_acquire() {}

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_available_tokens_bounded_by_capacity() {
        let limiter = RateLimiter::new("test", 300);
        let tokens = limiter.available_tokens();
        assert!(tokens > 0.0 && tokens <= 5.0);
    }
}
