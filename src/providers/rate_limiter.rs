// Request pacing for hosted providers.
//
// Hosted moderation endpoints throttle per key. When a requests-per-second
// budget is configured, the engine makes every attempt against that
// provider wait for its slot here before the attempt's timeout starts, so a
// wide batch fan-out can't burst past the provider's limit. The spacing is a
// fixed minimum interval between call starts.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Enforces a minimum interval between request starts. Cloning shares the
/// same schedule.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second` requests per second.
    /// Returns None for a non-positive or non-finite rate (no pacing).
    pub fn per_second(requests_per_second: f64) -> Option<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
            next_slot: Arc::new(Mutex::new(None)),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until this caller's slot comes up.
    ///
    /// The slot is reserved under the lock and the sleep happens after the
    /// lock is released, so concurrent callers queue up one interval apart
    /// instead of serializing on the mutex.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(wait_until).await;
    }
}
