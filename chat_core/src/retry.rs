//! Exponential backoff with jitter, shared by the publish, subscribe and tailing paths.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Retry settings for one kind of I/O.
///
/// The delay before retry `n` (0-based) is `initial_backoff * 2^n`, capped at
/// `max_backoff`, then randomized by `±jitter` of itself and capped again.
/// `timeout` bounds each attempt; for subscriptions it is the inactivity bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: f64,
    pub timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(E),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::publish()
    }
}

impl RetryPolicy {
    /// 3 retries, 300ms..2s, ±50% jitter, 3s per attempt.
    pub const fn publish() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 300,
            max_backoff_ms: 2_000,
            jitter: 0.5,
            timeout_ms: 3_000,
        }
    }

    /// Same backoff as [`RetryPolicy::publish`] with a one hour inactivity bound.
    pub const fn subscribe() -> Self {
        Self {
            timeout_ms: 60 * 60 * 1_000,
            ..Self::publish()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay to wait before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let max = self.max_backoff_ms as f64;
        let base = (self.initial_backoff_ms as f64 * 2f64.powi(retry.min(32) as i32)).min(max);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let spread = base * jitter;
        let delay = if spread > 0.0 {
            rand::thread_rng().gen_range((base - spread)..=(base + spread))
        } else {
            base
        };
        Duration::from_millis(delay.clamp(0.0, max) as u64)
    }

    /// Run `op` until it succeeds, bounding every attempt by [`RetryPolicy::timeout`].
    ///
    /// Returns the last failure once `max_retries` retries have been spent.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut retries = 0;
        loop {
            let err = match tokio::time::timeout(self.timeout(), op()).await {
                Ok(Ok(v)) => {
                    if retries > 0 {
                        info!(operation, retries, "succeeded after retry");
                    }
                    return Ok(v);
                }
                Ok(Err(e)) => RetryError::Failed(e),
                Err(_) => RetryError::TimedOut(self.timeout()),
            };

            if retries >= self.max_retries {
                warn!(operation, retries, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.backoff(retries);
            retries += 1;
            warn!(
                operation,
                attempt = retries,
                max_retries = self.max_retries,
                error = %err,
                ?delay,
                "operation failed, will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_should_grow_and_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::publish()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(300));
        assert_eq!(policy.backoff(1), Duration::from_millis(600));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_200));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(2_000));
    }

    #[test]
    fn backoff_jitter_should_stay_within_half() {
        let policy = RetryPolicy::publish();
        for _ in 0..200 {
            let d = policy.backoff(0).as_millis();
            assert!((150..=450).contains(&d), "delay {d}ms out of range");
            let d = policy.backoff(5).as_millis();
            assert!((1_000..=2_000).contains(&d), "delay {d}ms out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_should_succeed_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let ret = RetryPolicy::publish()
            .retry("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("unreachable")
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(ret.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_should_give_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let ret: Result<(), _> = RetryPolicy::publish()
            .retry("broken", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("unreachable")
            })
            .await;

        assert!(matches!(ret, Err(RetryError::Failed("unreachable"))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_should_treat_timeouts_as_failures() {
        let calls = &AtomicU32::new(0);
        let ret: Result<(), RetryError<&str>> = RetryPolicy::publish()
            .retry("slow", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(ret, Err(RetryError::TimedOut(d)) if d == Duration::from_secs(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
