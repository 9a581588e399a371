//! Retry policies for failed agent calls.
//!
//! Retries happen inside a single execution record; `Execution::attempts`
//! counts the calls made. Only agent errors and timeouts are retried.

use std::time::Duration;

use opsagent_types::FailureKind;

pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt after `attempts` calls have failed, or
    /// `None` to give up.
    fn next_delay(&self, attempts: u32, failure: FailureKind) -> Option<Duration>;
}

/// Never retry. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempts: u32, _failure: FailureKind) -> Option<Duration> {
        None
    }
}

/// Doubling delay capped at `max_delay`, for up to `max_retries` extra calls.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempts: u32, failure: FailureKind) -> Option<Duration> {
        if !matches!(
            failure,
            FailureKind::AgentError | FailureKind::ExecutionTimeout
        ) {
            return None;
        }
        if attempts == 0 || attempts > self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempts - 1);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}
