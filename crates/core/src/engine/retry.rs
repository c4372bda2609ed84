use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::store::StoreError;

/// Retry budget for idempotent reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay: Duration::from_millis(25) }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    /// Exponential backoff with up to 100% jitter on top.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ceiling = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        base + Duration::from_millis(jitter)
    }

    /// Runs `operation`, retrying transient store failures only.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        event_name = "engine.read_retry",
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transient store failure; retrying read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::store::StoreError;

    fn fast() -> RetryPolicy {
        RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_at_most_twice() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = fast()
            .run("load", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Unavailable("database is locked".into())) }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = fast()
            .run("load", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Decode("bad status".into())) }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Decode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("load", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(StoreError::Unavailable("busy".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(1));
    }

    #[test]
    fn backoff_grows_and_stays_within_jitter_bound() {
        let policy = RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(10) };
        for attempt in 0..3 {
            let base = Duration::from_millis(10 * 2u64.pow(attempt));
            let delay = policy.backoff(attempt);
            assert!(delay >= base && delay <= base * 2, "attempt {attempt}: {delay:?}");
        }
        assert_eq!(RetryPolicy::none().backoff(0), Duration::ZERO);
    }
}
