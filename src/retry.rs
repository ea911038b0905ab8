//! Retry utilities with exponential backoff.
//!
//! Used by the LLM client adapter (§4.3) and the OAuth2-backed embedding
//! client (§4.4) to ride out transient network failures. Each component
//! supplies its own error type and its own `is_retryable` predicate (see
//! `LlmError::is_retryable` and `EmbeddingError::is_retryable` in
//! [`crate::error`]) rather than this module hard-coding one error type.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Random jitter fraction applied to each delay (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retry an async operation unconditionally up to `config.max_attempts` times.
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.expect("loop runs at least once since max_attempts >= 1"))
}

/// Retry an async operation, stopping early when `is_retryable` reports the
/// error is not worth retrying (e.g. an auth failure or a malformed request).
pub async fn retry_with_backoff_conditional<F, Fut, T, E>(
    config: RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.expect("loop runs at least once since max_attempts >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct FakeError(&'static str);

    #[test]
    fn retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
    }

    #[test]
    fn calculate_delay_grows_exponentially() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0);

        let delay0 = config.calculate_delay(0);
        let delay1 = config.calculate_delay(1);
        let delay2 = config.calculate_delay(2);

        assert!(delay1 > delay0);
        assert!(delay2 > delay1);
    }

    #[tokio::test]
    async fn retry_succeeds_on_first_attempt() {
        let config = RetryConfig::new().with_max_attempts(3);
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i32, FakeError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            let count = count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(FakeError("transient"))
                } else {
                    Ok::<i32, FakeError>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts_configured_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, FakeError>(FakeError("down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conditional_retry_stops_on_non_retryable_error() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff_conditional(
            config,
            |e: &FakeError| e.0 == "transient",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, FakeError>(FakeError("auth")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
