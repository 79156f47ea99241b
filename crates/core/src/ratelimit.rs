//! Rate-Limit Bucket and per-IP limiter section 4.1.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// A fixed-capacity token pool used for admission control.
///
/// Unlike a plain `Semaphore` permit, a token taken here is held across an
/// arbitrary async boundary (an `AddJob` call through to the backend
/// reporting a terminal status) rather than being released when a guard
/// drops, so acquisition and release are explicit `take`/`wait`/`put`
/// calls instead of RAII.
#[derive(Clone)]
pub struct RateLimitBucket {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl RateLimitBucket {
    pub fn new(capacity: usize) -> Self {
        Self { sem: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true iff a token was available without waiting.
    pub fn take(&self) -> bool {
        match self.sem.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Blocks until a token is available.
    pub async fn wait(&self) {
        // `Semaphore::acquire` only fails if the semaphore has been closed,
        // which this type never does.
        let permit = self.sem.clone().acquire_owned().await.expect("bucket semaphore never closed");
        permit.forget();
    }

    /// Returns a token to the pool. Never panics on over-release; the
    /// caller is responsible for pairing every `take`/`wait` with exactly
    /// one `put`.
    pub fn put(&self) {
        self.sem.add_permits(1);
    }

    /// Number of tokens currently available, for diagnostics.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

/// Per-remote-IP sliding-window limiter. Counts requests over the last
/// `window` and rejects excess with `HostError::RateLimited`. The health
/// check path is exempt by the caller simply not consulting this limiter
/// for that route.
pub struct PerIpRateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<std::collections::HashMap<std::net::IpAddr, VecDeque<Instant>>>,
}

impl PerIpRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, hits: Mutex::new(std::collections::HashMap::new()) }
    }

    /// Default policy: 100 requests per minute per remote IP.
    pub fn default_policy() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// Record a request from `addr` at `now`, returning `true` if it is
    /// within the limit and `false` if it should be rejected.
    pub fn check(&self, addr: std::net::IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock();
        let window = self.window;
        let entry = hits.entry(addr).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) > window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.limit {
            return false;
        }
        entry.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_without_wait_respects_capacity() {
        let bucket = RateLimitBucket::new(2);
        assert!(bucket.take());
        assert!(bucket.take());
        assert!(!bucket.take());
        bucket.put();
        assert!(bucket.take());
    }

    #[tokio::test]
    async fn wait_blocks_until_a_token_is_returned() {
        let bucket = RateLimitBucket::new(1);
        assert!(bucket.take());
        let bucket2 = bucket.clone();
        let waiter = tokio::spawn(async move {
            bucket2.wait().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        bucket.put();
        waiter.await.unwrap();
    }

    #[test]
    fn per_ip_limiter_rejects_excess_within_window() {
        let limiter = PerIpRateLimiter::new(2, Duration::from_secs(60));
        let addr: std::net::IpAddr = "127.0.0.1".parse().unwrap();
        let t0 = Instant::now();
        assert!(limiter.check(addr, t0));
        assert!(limiter.check(addr, t0));
        assert!(!limiter.check(addr, t0));
    }

    #[test]
    fn per_ip_limiter_resets_after_window_elapses() {
        let limiter = PerIpRateLimiter::new(1, Duration::from_millis(10));
        let addr: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        let t0 = Instant::now();
        assert!(limiter.check(addr, t0));
        assert!(!limiter.check(addr, t0));
        let t1 = t0 + Duration::from_millis(20);
        assert!(limiter.check(addr, t1));
    }

    #[test]
    fn per_ip_limiter_tracks_addresses_independently() {
        let limiter = PerIpRateLimiter::new(1, Duration::from_secs(60));
        let a: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        let b: std::net::IpAddr = "10.0.0.2".parse().unwrap();
        let t0 = Instant::now();
        assert!(limiter.check(a, t0));
        assert!(limiter.check(b, t0));
        assert!(!limiter.check(a, t0));
    }
}
