//! Minimum-interval limiter for calls to the external geocoding service.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces permits at least `min_interval` apart across all callers.
///
/// Callers queue on the internal lock, so permits are handed out in arrival
/// order.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a call is allowed and records it.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}
