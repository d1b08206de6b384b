// src/provider/retry.rs — Retry with exponential backoff for completion clients
//
// Wraps any ModelProvider and retries `chat` on transient failures: rate limits
// and provider errors marked retriable (5xx, timeouts, connection resets).
// Budget, configuration and bad-request errors are returned immediately.
//
// Retries happen inside one ledger reservation: the caller reserved before the
// first attempt and records or cancels once after the last.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelProvider};
use crate::infra::errors::RlmError;

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 1_000;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 20_000;
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

pub struct RetryProvider {
    inner: Arc<dyn ModelProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: Arc<dyn ModelProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry number `attempt` (0-indexed). A server-supplied
    /// retry-after wins over the backoff schedule.
    fn delay_for_attempt(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint + Duration::from_millis(100);
        }

        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter = deterministic_jitter(attempt, self.config.jitter_fraction);
        Duration::from_millis((capped_ms * jitter).max(0.0) as u64)
    }
}

fn rate_limit_delay(error: &RlmError) -> Option<Duration> {
    match error {
        RlmError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], reproducible per attempt.
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = attempt.wrapping_mul(2_654_435_761) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

#[async_trait]
impl ModelProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, RlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    let delay = self.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error()` for the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> RlmError,
    }

    #[async_trait]
    impl ModelProvider for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, RlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(ChatResponse {
                    content: "ok".into(),
                    ..Default::default()
                })
            }
        }
    }

    fn server_error() -> RlmError {
        RlmError::Provider {
            provider: "flaky".into(),
            message: "HTTP 503".into(),
            retriable: true,
        }
    }

    fn bad_request() -> RlmError {
        RlmError::Provider {
            provider: "flaky".into(),
            message: "HTTP 400".into(),
            retriable: false,
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn flaky(failures: u32, error: fn() -> RlmError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
            error,
        })
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let inner = flaky(2, server_error);
        let provider = RetryProvider::with_config(inner.clone(), fast());
        let resp = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = flaky(10, server_error);
        let provider = RetryProvider::with_config(inner.clone(), fast());
        let err = provider.chat(ChatRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 503"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = flaky(1, bad_request);
        let provider = RetryProvider::with_config(inner.clone(), fast());
        assert!(provider.chat(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_limit_hint_wins() {
        let provider = RetryProvider::new(flaky(0, server_error));
        let err = RlmError::RateLimited {
            provider: "flaky".into(),
            retry_after_ms: 3_000,
        };
        let d = provider.delay_for_attempt(0, rate_limit_delay(&err));
        assert_eq!(d, Duration::from_millis(3_100));

        let zero = RlmError::RateLimited {
            provider: "flaky".into(),
            retry_after_ms: 0,
        };
        assert!(rate_limit_delay(&zero).is_none());
        assert!(rate_limit_delay(&server_error()).is_none());
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let provider = RetryProvider::new(flaky(0, server_error));
        let d0 = provider.delay_for_attempt(0, None).as_millis();
        let d1 = provider.delay_for_attempt(1, None).as_millis();
        assert!((800..=1_200).contains(&d0), "{}", d0);
        assert!((1_600..=2_400).contains(&d1), "{}", d1);
        assert!(provider.delay_for_attempt(12, None).as_millis() <= 24_000);
    }

    #[test]
    fn test_jitter_range() {
        for attempt in 0..20 {
            let j = deterministic_jitter(attempt, 0.2);
            assert!((0.8..=1.2).contains(&j), "attempt {}: {}", attempt, j);
        }
    }
}
