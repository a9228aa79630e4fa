//! Retry middleware and error classification.
//!
//! The default policy is deliberately asymmetric: transport-level failures
//! (closed/refused connections, timeouts) retry immediately up to the attempt
//! ceiling, while HTTP-level responses — any status, 5xx included — and
//! application errors are surfaced without retry. HTTP error bodies carry
//! actionable information; providers that want 429/5xx retries opt in through
//! `ProviderAdapter::classify_retry`.

use std::time::Duration;

use crate::error::LlmError;

/// Outcome of classifying one failed attempt. Purely a function of
/// (error, attempt, policy) — never touches shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Per-provider retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt ceiling, including the first attempt.
    pub max_attempts: u32,
    /// Delay before retry number `attempt` (0-based). The default is zero:
    /// transport failures here are transient socket races, not congestion,
    /// so an immediate retry is the intended behavior.
    pub delay: fn(u32) -> Duration,
}

fn no_delay(_attempt: u32) -> Duration {
    Duration::ZERO
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: no_delay,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: fn(u32) -> Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Default classification: retry transport errors while attempts remain,
/// nothing else.
pub fn default_classification(
    error: &LlmError,
    attempt: u32,
    policy: &RetryPolicy,
) -> RetryDecision {
    if error.is_retryable() && attempt + 1 < policy.max_attempts {
        RetryDecision::RetryAfter((policy.delay)(attempt))
    } else {
        RetryDecision::NoRetry
    }
}

/// Drives an operation under a retry classifier.
///
/// `classify` is consulted after each failure; `RetryAfter` sleeps the given
/// delay and re-runs the operation. The operation closure rebuilds its
/// request on every call, so signed requests are re-signed per attempt.
pub async fn run_with_retry<T, F, Fut, C>(mut operation: F, classify: C) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
    C: Fn(&LlmError, u32) -> RetryDecision,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match classify(&error, attempt) {
                RetryDecision::NoRetry => return Err(error),
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transport failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn classify_default(policy: &RetryPolicy) -> impl Fn(&LlmError, u32) -> RetryDecision + '_ {
        move |error, attempt| default_classification(error, attempt, policy)
    }

    #[tokio::test]
    async fn transport_errors_retry_up_to_the_ceiling() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), LlmError> = run_with_retry(
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::transport("connection closed"))
                }
            },
            classify_default(&policy),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn http_500_is_not_retried_by_default() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), LlmError> = run_with_retry(
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::api(500, "internal server error", None))
                }
            },
            classify_default(&policy),
        )
        .await;

        assert!(matches!(result, Err(LlmError::ApiError { status: 500, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_transport_for_retry_purposes() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(
            || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(LlmError::timeout("read timed out"))
                    } else {
                        Ok("recovered")
                    }
                }
            },
            classify_default(&policy),
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_delay_is_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(
            default_classification(&LlmError::transport("x"), 0, &policy),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
    }

    #[test]
    fn attempt_ceiling_stops_classification() {
        let policy = RetryPolicy::default();
        assert_eq!(
            default_classification(&LlmError::transport("x"), 2, &policy),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn custom_delay_function_is_applied() {
        fn linear(attempt: u32) -> Duration {
            Duration::from_millis(10 * (attempt as u64 + 1))
        }
        let policy = RetryPolicy::new().with_max_attempts(5).with_delay(linear);
        assert_eq!(
            default_classification(&LlmError::transport("x"), 1, &policy),
            RetryDecision::RetryAfter(Duration::from_millis(20))
        );
    }
}
