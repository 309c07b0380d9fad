//! Retry policy for provider calls.
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`base_delay * 2^(attempt-2)` before attempt N, capped
//! at `max_delay`) keeps N concurrent workers from hammering a recovering
//! endpoint in lock-step. With the defaults (1 s base, 4 attempts) the wait
//! sequence is 1 s → 2 s → 4 s.
//!
//! The policy is a plain value injected into [`crate::pipeline::llm::ModelInvoker`]
//! so tests can swap in zero delays and a custom classification predicate.

use crate::error::ProviderError;
use std::fmt;
use std::time::Duration;

/// Decides whether a provider error is worth another attempt.
pub type RetryPredicate = fn(&ProviderError) -> bool;

/// Bounded exponential backoff.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Classification predicate. Default: [`ProviderError::is_transient`].
    pub retry_on: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_on: ProviderError::is_transient,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never sleeps; used by tests and `--no-retry` style callers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn with_predicate(mut self, retry_on: RetryPredicate) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn should_retry(&self, error: &ProviderError) -> bool {
        (self.retry_on)(error)
    }

    /// Delay to wait *before* `attempt` (1-based). Attempt 1 never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}
