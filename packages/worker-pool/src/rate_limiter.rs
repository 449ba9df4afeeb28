//! ============================================================================
//! File: packages/worker-pool/src/rate_limiter.rs
//! ----------------------------------------------------------------------------
//! Token-bucket rate limiter, one instance per slot. A worker that floods the
//! host channel is assumed hostile: on denial the caller terminates the slot
//! rather than throttling, because the worker's resources are already spent.
//! ============================================================================

use std::time::Instant;

/// A token bucket refilled uniformly at `capacity` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_messages_per_second: u32) -> Self {
        let capacity = max_messages_per_second.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Deducts one token if available, first refilling based on elapsed time.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;

    #[test]
    fn denies_once_capacity_exhausted() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let mut limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        sleep(Duration::from_millis(150));
        assert!(limiter.try_acquire());
    }
}
