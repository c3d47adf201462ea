use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Result};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_str, Domain, Level};

/// Backoff policy for sink connect/send.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff capped at `max_delay_ms`, ±`jitter_factor`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Marks an error that retrying cannot fix (bad credentials, 4xx).
#[derive(Debug)]
pub struct Permanent(pub String);

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permanent failure: {}", self.0)
    }
}

impl std::error::Error for Permanent {}

/// Retry a fallible async operation with exponential backoff. Errors
/// wrapping [`Permanent`] stop the loop immediately.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !backoff(config, operation_name, attempt, &e).await {
                    return Err(e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} exhausted without error", operation_name)))
}

/// Boxed future borrowing the retried target, as `#[async_trait]` methods
/// return.
pub type TargetFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// `retry_async` for operations that need `&mut` access to a target on
/// every attempt, such as a sink's `connect`.
pub async fn retry_with<S, F, T>(config: &RetryConfig, operation_name: &str, target: &mut S, mut operation: F) -> Result<T>
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S) -> TargetFuture<'a, T>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        match operation(target).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !backoff(config, operation_name, attempt, &e).await {
                    return Err(e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} exhausted without error", operation_name)))
}

/// Sleep before the next attempt. `false` when the error is permanent or
/// the budget is spent.
async fn backoff(config: &RetryConfig, operation_name: &str, attempt: u32, e: &anyhow::Error) -> bool {
    if e.downcast_ref::<Permanent>().is_some() {
        return false;
    }
    if attempt >= config.max_retries {
        return true;
    }
    let delay = config.delay_for_attempt(attempt);
    log(
        Level::Warn,
        Domain::Telemetry,
        "retry",
        obj(&[
            ("operation", v_str(operation_name)),
            ("attempt", json!(attempt + 1)),
            ("max_attempts", json!(config.max_retries + 1)),
            ("error", v_str(&e.to_string())),
            ("delay_ms", json!(delay.as_millis() as u64)),
        ]),
    );
    sleep(delay).await;
    true
}

pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status,
        408 |   // Request Timeout
        429 |   // Too Many Requests
        500 |   // Internal Server Error
        502 |   // Bad Gateway
        503 |   // Service Unavailable
        504     // Gateway Timeout
    )
}

pub fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = RetryConfig {
            jitter_factor: 0.3,
            ..RetryConfig::default()
        };
        for _ in 0..100 {
            let d = config.delay_for_attempt(1).as_millis();
            assert!((140..=260).contains(&d), "delay {}", d);
        }
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<&str> = retry_async(&fast(3), "connect", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("hub unavailable"))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "connected");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<()> = retry_async(&fast(2), "send", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("timeout"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_short_circuits() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<()> = retry_async(&fast(5), "send", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Permanent("401 unauthorized".to_string()).into())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    struct Flaky {
        failures_left: u32,
        calls: u32,
    }

    impl Flaky {
        fn open(&mut self) -> TargetFuture<'_, u32> {
            Box::pin(async move {
                self.calls += 1;
                if self.failures_left > 0 {
                    self.failures_left -= 1;
                    Err(anyhow!("refused"))
                } else {
                    Ok(self.calls)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_retry_with_borrows_target_each_attempt() {
        let mut target = Flaky { failures_left: 2, calls: 0 };
        let calls = retry_with(&fast(3), "connect", &mut target, |t| t.open()).await.unwrap();
        assert_eq!(calls, 3);

        let mut target = Flaky { failures_left: 10, calls: 0 };
        assert!(retry_with(&fast(1), "connect", &mut target, |t| t.open()).await.is_err());
        assert_eq!(target.calls, 2);
    }

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_http_error(429));
        assert!(is_retryable_http_error(503));
        assert!(!is_retryable_http_error(401));
        assert!(!is_retryable_http_error(400));
    }
}
