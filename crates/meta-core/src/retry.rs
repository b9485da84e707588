//! Bounded exponential backoff with jitter: initial delay 1s,
//! factor 2, max 5 attempts, applied to every git and remote-backend
//! operation.

use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor, 0.0 (none) to 1.0 (full).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
        }
    }
}

pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let delay = config
        .base_delay
        .saturating_mul(2_u32.saturating_pow(pow))
        .min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(delay, config.jitter)
    } else {
        delay
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round().max(0.0) as u64;
    Duration::from_millis(millis)
}

/// Runs `op` with bounded retry: `op` returns `Err(Some(err))` for a
/// classified failure the caller wants inspected, and a retry is attempted
/// only while `Error::is_retryable` holds and attempts remain.
pub fn with_retry<T>(
    config: &RetryConfig,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut(u32) -> Result<T, Error>,
) -> Result<T, Error> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                sleep(calculate_delay(config, attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
