//! Exponential-backoff retry for async gateway operations
//!
//! Only errors in the policy's retryable set consume attempts; everything
//! else propagates immediately. Exhaustion wraps the last error so callers
//! can still see the root cause.

use crate::error::{ErrorKind, GatewayError, Result};
use crate::metrics::METRICS;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry behavior parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            retryable: HashSet::from([
                ErrorKind::RateLimited,
                ErrorKind::InvalidResponse,
                ErrorKind::Timeout,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from the client's retry settings
    pub fn from_config(config: &crate::config::ClientConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.retry_delay(),
            backoff_factor: config.retry_backoff_factor,
            ..Self::default()
        }
    }

    /// Extend the retryable set with additional kinds
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable.extend(kinds);
        self
    }

    pub fn is_retryable(&self, error: &GatewayError) -> bool {
        self.retryable.contains(&error.kind())
    }

    /// Delay before the retry following `attempt` (zero-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.base_delay
            .mul_f64(self.backoff_factor.powi(attempt as i32))
    }
}

/// Runs async operations under a retry policy
pub struct RetryExecutor {
    policy: RetryPolicy,
    operation: &'static str,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, operation: &'static str) -> Self {
        Self { policy, operation }
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts the attempt
    /// budget. `op` must produce a fresh future per attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.policy.is_retryable(&e) => {
                    METRICS
                        .retry_attempts
                        .with_label_values(&[self.operation])
                        .inc();

                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            operation = self.operation,
                            attempt = attempt + 1,
                            max = self.policy.max_attempts,
                            error = %e,
                            "retryable failure, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        error!(
                            operation = self.operation,
                            attempts = self.policy.max_attempts,
                            error = %e,
                            "all attempts exhausted"
                        );
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(operation = self.operation, error = %e, "non-retryable failure");
                    return Err(e);
                }
            }
        }

        METRICS
            .retry_exhaustions
            .with_label_values(&[self.operation])
            .inc();

        Err(GatewayError::Exhausted {
            attempts: self.policy.max_attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                GatewayError::Configuration("retry executor ran zero attempts".to_string())
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let executor = RetryExecutor::new(fast_policy(3), "test");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result = executor
            .run(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(GatewayError::RateLimited {
                            provider: "Bing".into(),
                            message: "slow down".into(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_invoked_exactly_once() {
        let executor = RetryExecutor::new(fast_policy(3), "test");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result: Result<()> = executor
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::ModelNotFound("gpt-9".into())) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::ModelNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let executor = RetryExecutor::new(fast_policy(2), "test");

        let result: Result<()> = executor
            .run(|| async {
                Err(GatewayError::Timeout(Duration::from_secs(1)))
            })
            .await;

        match result {
            Err(GatewayError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert_eq!(source.kind(), ErrorKind::Timeout);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_grow_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        };
        let executor = RetryExecutor::new(policy, "test");

        let start = tokio::time::Instant::now();
        let result: Result<()> = executor
            .run(|| async {
                Err(GatewayError::RateLimited {
                    provider: "Bing".into(),
                    message: "429".into(),
                })
            })
            .await;

        assert!(result.is_err());
        // Sleeps of 2s and 4s between three attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_delay_for() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }
}
