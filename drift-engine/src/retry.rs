//! Retry with exponential backoff
//!
//! Re-attempts only errors the taxonomy marks retryable; everything else
//! surfaces immediately. Delay for attempt n is
//! `min(initial * factor^(n-1), max)`, with optional additive jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use drift_types::{Result, SyncConfig};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Adds up to 10% random extra delay per attempt, never exceeding
    /// `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            factor: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            factor: config.backoff_factor,
            jitter: false,
        }
    }

    /// Delay before the attempt following failed attempt `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(32);
        let base = (initial * self.factor.powi(exponent as i32)).min(max);

        let mut delay_ms = base as u64;
        if self.jitter && delay_ms > 0 {
            let extra = rand::thread_rng().gen_range(0..=delay_ms / 10);
            delay_ms = (delay_ms + extra).min(max as u64);
        }
        Duration::from_millis(delay_ms)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or
/// `max_attempts` is exhausted. The last error is surfaced.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!("attempt {attempt}/{max_attempts} failed, retrying in {delay:?}: {err}");
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
