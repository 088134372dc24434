//! # Filesystem Retry Policy
//!
//! Transient filesystem failures (network shares, antivirus locks on freshly written
//! files) are retried with exponential backoff and jitter. Retrying never changes
//! what gets written; it only gives a flaky operation more chances.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RecoveryConfig;
use crate::errors::error_logging;

/// Calculate retry delay with exponential backoff and jitter.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + jitter,  jitter in [0, delay/4)
/// ```
///
/// `attempt` is 1-based.
///
/// # Examples
///
/// ```
/// use roll_inspector::config::RecoveryConfig;
/// use roll_inspector::retry::calculate_retry_delay;
///
/// let config = RecoveryConfig::default();
/// let delay = calculate_retry_delay(1, &config);
/// assert!(delay >= config.base_retry_delay_ms);
/// ```
pub fn calculate_retry_delay(attempt: u32, recovery: &RecoveryConfig) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let base_delay = recovery.base_retry_delay_ms as f64;

    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let exponential_delay = base_delay * 2.0_f64.powi(exponent);

    #[allow(clippy::cast_precision_loss)]
    let delay = exponential_delay.min(recovery.max_retry_delay_ms as f64) as u64;

    let jitter_span = delay / 4;
    let jitter = if jitter_span > 0 {
        rand::rng().random_range(0..jitter_span)
    } else {
        0
    };
    delay + jitter
}

/// Runs `f` until it succeeds or `max_retries + 1` attempts have failed.
///
/// Each failure before the last is logged and followed by a blocking sleep. The
/// error of the final attempt is returned unchanged.
pub fn with_retry<T, E, F>(operation: &str, recovery: &RecoveryConfig, mut f: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = recovery.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts {
                    error_logging::log_filesystem_error(&err, operation, None, Some(attempt));
                    return Err(err);
                }
                let delay_ms = calculate_retry_delay(attempt, recovery);
                warn!(
                    operation = %operation,
                    attempt,
                    delay_ms,
                    error = %err,
                    "Filesystem operation failed, retrying"
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_retries: u32) -> RecoveryConfig {
        RecoveryConfig {
            max_retries,
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RecoveryConfig {
            max_retries: 5,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 300,
        };

        let first = calculate_retry_delay(1, &config);
        assert!((100..125).contains(&first), "first delay {}", first);

        let second = calculate_retry_delay(2, &config);
        assert!((200..250).contains(&second), "second delay {}", second);

        let capped = calculate_retry_delay(10, &config);
        assert!((300..375).contains(&capped), "capped delay {}", capped);
    }

    #[test]
    fn test_small_delays_have_no_jitter() {
        let config = fast_config(1);
        assert_eq!(calculate_retry_delay(1, &config), 1);
        assert_eq!(calculate_retry_delay(0, &config), 1);
    }

    #[test]
    fn test_with_retry_recovers_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> = with_retry("write", &fast_config(2), || {
            calls += 1;
            if calls < 3 {
                Err(format!("attempt {} failed", calls))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_with_retry_returns_last_error() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry("move", &fast_config(1), || {
            calls += 1;
            Err(format!("attempt {}", calls))
        });
        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = with_retry("read", &fast_config(0), || {
            calls += 1;
            Err("boom")
        });
        assert_eq!(calls, 1);
    }
}
