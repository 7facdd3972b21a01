//! Retry policy for coordination-service calls.
//!
//! # Responsibilities
//! - Describe how often and how long an operation is retried
//! - Compute the delay before each attempt (exponential backoff + jitter)
//! - Run an async operation until it succeeds or the budget is spent

use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;

/// Backoff parameters plus an optional attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }

    /// Whether another attempt may follow `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the budget runs out.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut should_retry: impl FnMut(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !should_retry(&e) || !self.allows(attempt) {
                        tracing::error!(operation = what, attempt, error = %e, "Giving up");
                        return Err(e);
                    }
                    let delay = self.delay(attempt);
                    tracing::warn!(operation = what, attempt, delay = ?delay, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
