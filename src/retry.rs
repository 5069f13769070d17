//! Retry with exponential backoff for provider calls.
//!
//! Providers make exactly one attempt per call; this module owns the retry
//! loop. Only errors reporting [`RagError::is_retryable`] (quota and
//! transient network failures) are retried. Each attempt is bounded by a
//! timeout, and an attempt that times out counts as a transient failure.
//!
//! Backoff doubles per attempt starting at `base_delay`, capped at
//! `base_delay * 2^5`: 1s, 2s, 4s, 8s, 16s, 32s with the default base.

use std::future::Future;
use std::time::Duration;

use ragchat_core::{RagError, Result};

use crate::config::{EmbeddingConfig, GenerationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn for_embedding(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
            attempt_timeout: config.timeout(),
        }
    }

    pub fn for_generation(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
            attempt_timeout: config.timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up. Returns the last error in the latter case.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::TransientNetwork(format!(
                "{} timed out after {:?}",
                what, policy.attempt_timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        assert_eq!(policy.delay(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(3), "embed", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RagError::TransientNetwork("reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(2), "embed", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::QuotaExceeded("slow down".into()))
        })
        .await;
        assert!(matches!(result, Err(RagError::QuotaExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(5), "embed", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::InvalidInput("too long".into()))
        })
        .await;
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(20),
        };
        let result: Result<()> = with_retry(&policy, "generate", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(RagError::TransientNetwork(msg)) => assert!(msg.contains("generate")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
