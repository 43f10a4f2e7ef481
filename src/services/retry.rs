//! Retry with exponential backoff around any outbound call.
//!
//! The caller supplies a classifier deciding per error whether another
//! attempt is worthwhile and, optionally, how long the remote side asked us
//! to wait before trying again.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    Retry { after: Option<Duration> },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Three attempts, half a second doubling; used for notification and
    /// identity lookups.
    pub fn standard() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(after) => after.min(self.max_delay),
            None => {
                let backoff = self.backoff(attempt);
                let spread = (backoff.as_millis() as u64 / 10).max(1);
                backoff + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
            }
        }
    }

    /// Run `op` until it succeeds, the classifier says stop, or the attempt
    /// ceiling is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, C>(&self, label: &str, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let RetryDecision::Retry { after } = classify(&err) else {
                        return Err(err);
                    };
                    if attempt >= self.max_attempts {
                        tracing::error!(attempt, max_attempts = self.max_attempts, "{label} failed, giving up: {err}");
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt, after);
                    tracing::warn!(attempt, max_attempts = self.max_attempts, ?delay, "{label} failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Classifier for calls where every failure is worth another attempt.
pub fn always<E>(_: &E) -> RetryDecision {
    RetryDecision::Retry { after: None }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn stops_at_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<(), String> = policy
            .run(
                "flaky call",
                move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                },
                always,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<(), String> = policy
            .run(
                "rejected call",
                move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad request".to_string())
                },
                |_| RetryDecision::Stop,
            )
            .await;

        assert_eq!(result.unwrap_err(), "bad request");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn honors_server_delay_hint() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let started = Instant::now();

        let result: Result<u32, String> = policy
            .run(
                "hinted call",
                |attempt| async move {
                    if attempt == 1 {
                        Err("slow down".to_string())
                    } else {
                        Ok(attempt)
                    }
                },
                |_| RetryDecision::Retry {
                    after: Some(Duration::from_millis(60)),
                },
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
