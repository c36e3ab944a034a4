// Retry with exponential backoff for provider calls.
//
// Adapters never retry on their own. The engine wraps each provider call in
// `with_retry`, which re-invokes on rate-limit and network failures and
// returns every other error immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;
use crate::taxonomy::ProviderId;

/// How many times, and how patiently, to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_backoff: Duration,
    /// Cap on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped at `max_backoff`, then jittered by up to +/-25%.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);

        // The nanosecond component of the clock is enough variation to keep
        // concurrent batch items from retrying in lockstep.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter = (nanos % 500) as f64 / 1000.0 - 0.25; // [-0.25, 0.25)
        backoff.mul_f64(1.0 + jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of retries. The last error is returned as-is.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    provider: ProviderId,
    operation: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_retries {
                    return Err(err);
                }

                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    %provider,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
