//! Exponential backoff with jitter for transient transport failures
//! (§4.4, §5). 4xx errors other than 429 are never retried; 429s use the
//! server's advised delay instead of the backoff schedule.

use super::error::TransportError;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp / 4 + 1);
        Duration::from_millis(exp + jitter_ms)
    }

    /// Run `op` under this policy. `op` is invoked at least once and at
    /// most `max_attempts`. A permanent/non-retryable error returns
    /// immediately; retryable errors sleep per the schedule (or the
    /// server-advised delay for rate limits) before the next attempt.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.retryable() || attempt + 1 >= self.max_attempts => return Err(err),
                Err(TransportError::RateLimited { retry_after_secs }) => {
                    warn!(attempt, retry_after_secs, "rate limited, sleeping before retry");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    attempt += 1;
                }
                Err(err) => {
                    let delay = self.backoff_for(attempt);
                    warn!(attempt, ?delay, error = %err, "transient transport error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
