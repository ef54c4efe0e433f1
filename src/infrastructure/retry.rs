//! Centralized retry with randomized backoff.
//!
//! One helper, parameterized by attempt bound, base delay, jitter range and
//! a retryability classifier, replaces the ad hoc jittered sleeps the crawl
//! would otherwise scatter through the fingerprint probe, the main load and
//! next-page detection.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::CrawlError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Uniform random extra delay in `[0, jitter]` added to every backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.base_delay + self.jitter.mul_f64(fastrand::f64())
    }
}

/// Run `op` until it succeeds, the classifier declares its error fatal, or
/// the attempt bound is exhausted. The last error is returned as-is.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    retryable: impl Fn(&CrawlError) -> bool,
    mut op: F,
) -> Result<T, CrawlError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CrawlError>> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && retryable(&err) => {
                let delay = policy.backoff();
                warn!(
                    "{label}: attempt {attempt}/{} failed ({err}), retrying in {:?}",
                    policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sleep `base + U(0, jitter)` milliseconds - the humanized pacing delay
/// used between page interactions.
pub async fn sleep_jitter(base_ms: u64, jitter_ms: u64) {
    let extra = (jitter_ms as f64 * fastrand::f64()) as u64;
    tokio::time::sleep(Duration::from_millis(base_ms + extra)).await;
}
