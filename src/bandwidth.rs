//! Transfer rate limiting with a token bucket.
//!
//! Inbound traffic (network to store) and outbound traffic (store to
//! network) are limited independently.
//!
//! # Example
//!
//! ```
//! use peerstore::BandwidthLimiter;
//!
//! # async fn example() {
//! // 1MB/s inbound, 500KB/s outbound
//! let limiter = BandwidthLimiter::new(1_000_000, 500_000);
//!
//! limiter.acquire_inbound(16384).await;
//! limiter.acquire_outbound(8192).await;
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::constants::BANDWIDTH_BURST_MULTIPLIER;

/// A token bucket rate limiter.
///
/// Tokens accrue at the configured byte rate up to a burst ceiling. A caller
/// that takes more tokens than are available is told how long to sleep.
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
    turn: Semaphore,
}

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    tokens_per_sec: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(bytes_per_sec: u64) -> Self {
        let max_tokens = (bytes_per_sec * BANDWIDTH_BURST_MULTIPLIER) as f64;
        Self {
            tokens: max_tokens,
            max_tokens,
            tokens_per_sec: bytes_per_sec as f64,
            last_update: Instant::now(),
        }
    }

    fn take(&mut self, bytes: usize) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.tokens = (self.tokens + elapsed * self.tokens_per_sec).min(self.max_tokens);

        let wanted = bytes as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            Duration::ZERO
        } else {
            let missing = wanted - self.tokens;
            self.tokens = 0.0;
            Duration::from_secs_f64(missing / self.tokens_per_sec)
        }
    }
}

impl RateLimiter {
    /// Creates a limiter for `bytes_per_sec`; zero means unlimited.
    pub fn new(bytes_per_sec: u64) -> Arc<Self> {
        Arc::new(Self {
            bucket: (bytes_per_sec > 0).then(|| Mutex::new(TokenBucket::new(bytes_per_sec))),
            turn: Semaphore::new(1),
        })
    }

    pub fn unlimited() -> Arc<Self> {
        Self::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Takes `bytes` tokens and returns how long the caller should wait
    /// before moving them.
    pub async fn acquire(&self, bytes: usize) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };
        // Serialize takers so waits are handed out in arrival order.
        let _turn = self.turn.acquire().await.ok();
        bucket.lock().take(bytes)
    }

    /// Currently available tokens, `usize::MAX` when unlimited.
    pub fn available(&self) -> usize {
        match &self.bucket {
            Some(bucket) => bucket.lock().tokens as usize,
            None => usize::MAX,
        }
    }
}

/// Independent inbound and outbound rate limits for transfers.
pub struct BandwidthLimiter {
    inbound: Arc<RateLimiter>,
    outbound: Arc<RateLimiter>,
}

impl BandwidthLimiter {
    /// Creates a limiter; a limit of 0 means unlimited.
    pub fn new(inbound_limit: u64, outbound_limit: u64) -> Self {
        Self {
            inbound: RateLimiter::new(inbound_limit),
            outbound: RateLimiter::new(outbound_limit),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// Waits until `bytes` may be received.
    pub async fn acquire_inbound(&self, bytes: usize) {
        let wait = self.inbound.acquire(bytes).await;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Waits until `bytes` may be sent.
    pub async fn acquire_outbound(&self, bytes: usize) {
        let wait = self.outbound.acquire(bytes).await;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    pub fn inbound(&self) -> &Arc<RateLimiter> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<RateLimiter> {
        &self.outbound
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        assert!(limiter.is_unlimited());
        assert_eq!(limiter.acquire(usize::MAX / 2).await, Duration::ZERO);
        assert_eq!(limiter.available(), usize::MAX);
    }

    #[tokio::test]
    async fn test_burst_then_wait() {
        let limiter = RateLimiter::new(1000);
        assert_eq!(limiter.acquire(2000).await, Duration::ZERO);

        let wait = limiter.acquire(500).await;
        assert!(wait > Duration::from_millis(400));
        assert!(wait <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bandwidth_limiter_sleeps() {
        let limiter = BandwidthLimiter::new(1000, 0);
        let started = tokio::time::Instant::now();

        limiter.acquire_inbound(2000).await;
        limiter.acquire_inbound(1000).await;
        assert!(started.elapsed() >= Duration::from_millis(900));

        let started = tokio::time::Instant::now();
        limiter.acquire_outbound(1_000_000).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
