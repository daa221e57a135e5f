//! Exponential backoff retry policy with jitter.
//!
//! Submissions retry in memory, sequentially, up to a small fixed ceiling.
//! Delays grow exponentially from a base, never shrink from one retry to the
//! next, and never exceed the policy's cap, including delays requested by a
//! `Retry-After` header.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy configuration for error submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Upper bound of added jitter, as a fraction (0.0 to 1.0) of the delay.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Returns a copy of this policy without jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: delay doubles each attempt.
    Exponential,
    /// Linear backoff: delay increases by base amount each attempt.
    Linear,
}

/// Retry decision context for a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Number of attempts made so far (1-based).
    pub attempt_number: u32,
    /// Error that caused the attempt to fail.
    pub error: &'a DeliveryError,
    /// Delay used before the failed attempt, zero after the first.
    pub previous_delay: Duration,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting for `delay`.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Do not retry.
    GiveUp {
        /// Why another attempt will not be made
        reason: GiveUpReason,
    },
}

/// Why a submission stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure is permanent.
    NonRetryable,
    /// The attempt ceiling was reached.
    AttemptsExhausted,
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed attempt.
    pub fn new(
        attempt_number: u32,
        error: &'a DeliveryError,
        previous_delay: Duration,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, previous_delay, policy }
    }

    /// Determines if and when to retry based on the failure context.
    ///
    /// A non-retryable error gives up regardless of the attempt count, so a
    /// permanent failure on the last attempt is still reported as permanent.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp { reason: GiveUpReason::NonRetryable };
        }

        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp { reason: GiveUpReason::AttemptsExhausted };
        }

        RetryDecision::Retry { delay: self.calculate_delay() }
    }

    /// Calculates the delay until the next attempt.
    ///
    /// The result is at least `previous_delay` and at most the policy cap.
    pub fn calculate_delay(&self) -> Duration {
        let max_delay = self.policy.max_delay;

        let delay = match self.error.retry_after_seconds() {
            Some(retry_after_seconds) => Duration::from_secs(retry_after_seconds).min(max_delay),
            None => {
                let base_delay = match self.policy.backoff_strategy {
                    BackoffStrategy::Fixed => self.policy.base_delay,
                    BackoffStrategy::Linear => self.policy.base_delay * self.attempt_number,
                    BackoffStrategy::Exponential => {
                        let exponent = self.attempt_number.saturating_sub(1).min(20);
                        self.policy.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
                    },
                };
                let capped_delay = base_delay.min(max_delay);
                apply_jitter(capped_delay, self.policy.jitter_factor).min(max_delay)
            },
        };

        delay.max(self.previous_delay.min(max_delay))
    }
}

/// Adds up to `jitter_factor` of the delay, never subtracting.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rand::rng().random_range(0.0..=jitter_range);

    duration + Duration::from_secs_f64(jitter_offset)
}

/// The default policy: 4 attempts, 100ms base, 2s cap, up to +20% jitter.
pub fn default_policy() -> RetryPolicy {
    RetryPolicy::default()
}

/// A policy that never retries.
pub fn single_attempt_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 1, ..RetryPolicy::default() }
}
