use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{UPSTREAM_MAX_ATTEMPTS, UPSTREAM_RETRY_DELAY_SECS};
use crate::error::{AppError, Result};

/// Cap for exponential backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy for every upstream aggregator post.
    pub fn upstream() -> Self {
        Self {
            max_attempts: UPSTREAM_MAX_ATTEMPTS,
            delay: Duration::from_secs(UPSTREAM_RETRY_DELAY_SECS),
            backoff: Backoff::Fixed,
        }
    }

    /// Pause before attempt `attempt + 1` (attempt is 1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(MAX_BACKOFF)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::upstream()
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent.
/// On exhaustion the last error is wrapped in `AppError::RetriesExhausted`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(operation, attempt, max_attempts = attempts, "Attempt failed: {e}");
                last_error = e.to_string();
            }
        }

        if attempt < attempts {
            let pause = policy.delay_after(attempt);
            info!(operation, "Retrying in {}ms", pause.as_millis());
            sleep(pause).await;
        }
    }

    error!(
        operation,
        attempts,
        "{operation} failed after {attempts} attempts, contact the aggregator operator: {last_error}"
    );
    Err(AppError::RetriesExhausted {
        operation: operation.to_string(),
        attempts,
        last_error,
    })
}
