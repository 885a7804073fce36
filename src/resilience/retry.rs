use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::{RelayError, Result};

/// Exponential-backoff retry budget.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Execute `op` with exponential backoff and full jitter:
/// `delay = rand(0, min(max_delay, base_delay * 2^attempt))`.
///
/// Only transient errors (429/5xx) are retried; everything else is
/// returned as-is. The deadline is checked before every attempt, bounds
/// each attempt, and truncates backoff sleeps.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(RelayError::DeadlineExceeded);
            }
        }

        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline.into(), op()).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::DeadlineExceeded),
            },
            None => op().await,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt == config.max_retries || !err.is_transient() {
            return Err(err);
        }

        let mut delay = backoff_delay(config, attempt);
        if let Some(deadline) = deadline {
            delay = delay.min(deadline.saturating_duration_since(Instant::now()));
        }
        tokio::time::sleep(delay).await;

        attempt += 1;
    }
}

/// Full-jitter delay for the given attempt, clamped to at least 1 ms.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config.base_delay.as_secs_f64() * 2f64.powi(attempt.min(31) as i32);
    let capped = exponential.min(config.max_delay.as_secs_f64());
    let jittered = rand::thread_rng().gen::<f64>() * capped;
    Duration::from_secs_f64(jittered).max(Duration::from_millis(1))
}
