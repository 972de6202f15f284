//! Request pacing for third-party APIs.
//!
//! Connectors hold one [`RateLimiter`] per kind of request they want to
//! space out (listing pages, per-item detail fetches). Each limiter belongs to
//! a single connector instance, so concurrent connectors never share timers.
//! Tests inject [`Unlimited`] to run without real delays.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Waits until the next request may be issued.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self);
}

/// Enforces a minimum interval between consecutive acquisitions.
///
/// The first acquisition never waits.
pub struct IntervalLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn from_millis(ms: u64) -> Arc<dyn RateLimiter> {
        if ms == 0 {
            Arc::new(Unlimited)
        } else {
            Arc::new(Self::new(Duration::from_millis(ms)))
        }
    }
}

#[async_trait]
impl RateLimiter for IntervalLimiter {
    async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// No pacing at all.
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}
