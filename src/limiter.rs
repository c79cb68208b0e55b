//! Global throttle for remote store calls.
//!
//! Every call to the remote store goes through one shared [`RateLimiter`].
//! Callers queue on a fair mutex, so calls start in arrival order and never
//! closer together than the configured minimum interval.

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval gate shared by every remote call site.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum spacing between the start of two calls.
    min_interval: Duration,
    /// Start time of the previous call (None = no call yet).
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with an explicit minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Create a limiter allowing at most `qps` calls per second.
    ///
    /// A non-positive or non-finite rate disables spacing entirely.
    pub fn from_qps(qps: f64) -> Self {
        if qps.is_finite() && qps > 0.0 {
            Self::new(Duration::from_secs_f64(1.0 / qps))
        } else {
            Self::new(Duration::ZERO)
        }
    }

    /// Minimum spacing between calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn.
    ///
    /// Returns once at least `min_interval` has passed since the previous
    /// call started, and records now as the start of this call.
    pub async fn acquire(&self) {
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!("rate limiter sleeping {:?}", ready_at - now);
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());
    }

    /// Run `operation` once the gate opens. Its result is returned unchanged.
    pub async fn invoke<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        operation().await
    }

    /// Treat now as the start of the previous call.
    ///
    /// Used after a long-poll drains so the next call is spaced from the
    /// moment the poll finished rather than when it was opened.
    pub async fn touch(&self) {
        *self.last_start.lock().await = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_qps(1.0)
    }
}
