use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{error, warn};

use crate::Result;

/// How the wait between attempts grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every retry.
    Exponential,
}

/// Bounded retry of transient transport failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Add up to 25% random extra delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..0.25);
        delay + delay.mul_f64(extra)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are used up. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.jittered(self.delay_for(attempt));
                    warn!(
                        op = label,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "scan.retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        error!(
                            op = label,
                            attempts = attempt + 1,
                            error = %err,
                            "scan.retry.exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
