//! Bounded retry with exponential backoff for optimistic-concurrency conflicts.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ServiceError;

const MAX_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails with a non-conflict error, or the
    /// attempts are used up.
    ///
    /// Only `ConcurrentModification` is retried here; every other error
    /// (including `ServiceUnavailable`) goes straight back to the caller.
    pub fn run<T>(
        &self,
        operation: &'static str,
        mut op: impl FnMut(u32) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Err(ServiceError::ConcurrentModification(msg)) if attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    debug!(operation, attempt, delay_ms = delay.as_millis() as u64, conflict = %msg, "retrying after conflict");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(ServiceError::ConcurrentModification(msg)) => {
                    warn!(operation, attempts = attempt, "giving up after repeated conflicts");
                    return Err(ServiceError::ConcurrentModification(format!(
                        "{operation} gave up after {attempt} attempts: {msg}"
                    )));
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_millis(5));
        assert_eq!(p.delay_after(1), Duration::from_millis(5));
        assert_eq!(p.delay_after(2), Duration::from_millis(10));
        assert_eq!(p.delay_after(3), Duration::from_millis(20));
        assert_eq!(p.delay_after(10), MAX_DELAY);
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let p = RetryPolicy::new(5, Duration::from_millis(1));
        let out = p.run("test", |attempt| {
            if attempt < 3 {
                Err(ServiceError::ConcurrentModification("stale".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out, Ok(3));
    }

    #[test]
    fn attempts_are_bounded() {
        let p = RetryPolicy::new(4, Duration::from_millis(1));
        let mut calls = 0;
        let out: Result<(), _> = p.run("test", |_| {
            calls += 1;
            Err(ServiceError::ConcurrentModification("stale".into()))
        });
        assert_eq!(calls, 4);
        assert!(matches!(out, Err(ServiceError::ConcurrentModification(_))));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let p = RetryPolicy::default();
        let mut calls = 0;
        let out: Result<(), _> = p.run("test", |_| {
            calls += 1;
            Err(ServiceError::ServiceUnavailable("timeout".into()))
        });
        assert_eq!(calls, 1);
        assert!(out.unwrap_err().is_retryable());
    }
}
