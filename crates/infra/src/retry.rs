//! Retry of optimistic-concurrency conflicts.
//!
//! A command that lost the race on its stream (another writer appended
//! between load and append) is re-run from scratch: reload, re-handle,
//! re-append. Business conflicts are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::command_dispatcher::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total runs, the first one included.
    pub max_attempts: u32,
    /// Linear backoff: `base_delay * attempt`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before run `attempt + 1` (1-indexed `attempt`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts are used up. The last error is returned.
pub async fn retry_on_conflict<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, DispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "concurrency conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_concurrency_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = retry_on_conflict(fast(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DispatchError::Concurrency("stream moved".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), _> = retry_on_conflict(fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::Concurrency("stream moved".to_string()))
        })
        .await;
        assert!(matches!(out, Err(DispatchError::Concurrency(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_conflict_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), _> = retry_on_conflict(fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::Conflict("entry already posted".to_string()))
        })
        .await;
        assert!(matches!(out, Err(DispatchError::Conflict(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_linear() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(40));
    }
}
