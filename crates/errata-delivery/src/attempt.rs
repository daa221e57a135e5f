//! Per-submission delivery state.
//!
//! ```text
//! Idle ──► Gated
//!   │
//!   └──► Authenticating ──► Sending ──► Success
//!                             ▲  │
//!                             │  ├──► PermanentFailure
//!                             │  ├──► Exhausted
//!                      RetryWait ◄┘
//! ```

use std::{fmt, time::Duration};

use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DeliveryError;

/// State of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Created, nothing done yet.
    Idle,
    /// Blocked by the report mode; no I/O performed.
    Gated,
    /// Resolving the API key or OAuth2 token.
    Authenticating,
    /// An HTTP request is in flight.
    Sending,
    /// Waiting out a backoff delay.
    RetryWait,
    /// Accepted by the service.
    Success,
    /// Failed with an error that retrying cannot fix.
    PermanentFailure,
    /// Failed with a retryable error on the last allowed attempt.
    Exhausted,
}

impl DeliveryState {
    /// Returns true for states a submission never leaves.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Gated | Self::Success | Self::PermanentFailure | Self::Exhausted)
    }

    /// Returns true if moving to `next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Gated | Self::Authenticating)
                | (Self::Authenticating, Self::Sending | Self::PermanentFailure)
                | (
                    Self::Sending,
                    Self::Success | Self::RetryWait | Self::PermanentFailure | Self::Exhausted
                )
                | (Self::RetryWait, Self::Sending)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Gated => "gated",
            Self::Authenticating => "authenticating",
            Self::Sending => "sending",
            Self::RetryWait => "retry_wait",
            Self::Success => "success",
            Self::PermanentFailure => "permanent_failure",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Metadata of the last HTTP response received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status_code: u16,
}

/// Mutable record threaded through one submission's retry loop.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    submission_id: Uuid,
    payload: Bytes,
    attempts: u32,
    last_delay: Duration,
    state: DeliveryState,
}

impl DeliveryAttempt {
    /// Starts a submission of an already serialized event.
    pub fn new(payload: Bytes) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            payload,
            attempts: 0,
            last_delay: Duration::ZERO,
            state: DeliveryState::Idle,
        }
    }

    /// Identifier used to correlate this submission's log lines.
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    /// The serialized event body.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of HTTP requests started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The most recent backoff delay, zero before the first retry.
    pub fn last_delay(&self) -> Duration {
        self.last_delay
    }

    /// Current state.
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Marks the submission as blocked by the report mode.
    pub fn gate(&mut self) {
        self.transition(DeliveryState::Gated);
    }

    /// Marks credential resolution as started.
    pub fn authenticate(&mut self) {
        self.transition(DeliveryState::Authenticating);
    }

    /// Starts the next HTTP request and returns its 1-based attempt number.
    pub fn send(&mut self) -> u32 {
        self.transition(DeliveryState::Sending);
        self.attempts += 1;
        self.attempts
    }

    /// Records a backoff before the next request.
    pub fn wait(&mut self, delay: Duration) {
        self.transition(DeliveryState::RetryWait);
        self.last_delay = delay;
    }

    /// Marks the submission as accepted.
    pub fn succeed(&mut self) {
        self.transition(DeliveryState::Success);
    }

    /// Ends the submission after a failure that will not be retried.
    ///
    /// A retryable error ends in [`DeliveryState::Exhausted`] and anything
    /// else in [`DeliveryState::PermanentFailure`].
    pub fn fail(&mut self, retryable: bool) {
        let terminal =
            if retryable { DeliveryState::Exhausted } else { DeliveryState::PermanentFailure };
        self.transition(terminal);
    }

    /// Finishes the submission, producing its report.
    pub fn finish(
        self,
        error: Option<DeliveryError>,
        response: Option<ResponseMeta>,
        body: Value,
    ) -> DeliveryReport {
        debug_assert!(self.state.is_terminal(), "finished in non-terminal state {}", self.state);
        DeliveryReport {
            submission_id: self.submission_id,
            state: self.state,
            attempts: self.attempts,
            error,
            response,
            body,
        }
    }

    fn transition(&mut self, next: DeliveryState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal delivery transition {} -> {next}",
            self.state
        );
        tracing::trace!(
            submission_id = %self.submission_id,
            from = %self.state,
            to = %next,
            "delivery state change"
        );
        self.state = next;
    }
}

/// Terminal result of one submission.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Submission identifier, as logged.
    pub submission_id: Uuid,
    /// Terminal state.
    pub state: DeliveryState,
    /// Number of HTTP requests made.
    pub attempts: u32,
    /// The final error, if the event was not accepted.
    pub error: Option<DeliveryError>,
    /// Metadata of the last response, if any arrived.
    pub response: Option<ResponseMeta>,
    /// Body of the last response, `Null` without one.
    pub body: Value,
}

impl DeliveryReport {
    /// Returns true if the service accepted the event.
    pub fn is_success(&self) -> bool {
        self.state == DeliveryState::Success
    }

    /// Returns true if the submission ran out of attempts on retryable errors.
    pub fn is_exhausted(&self) -> bool {
        self.state == DeliveryState::Exhausted
    }

    /// Splits the report into the callback triple.
    pub fn into_parts(self) -> (Option<DeliveryError>, Option<ResponseMeta>, Value) {
        (self.error, self.response, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_retry_path() {
        let mut attempt = DeliveryAttempt::new(Bytes::from_static(b"{}"));
        assert_eq!(attempt.state(), DeliveryState::Idle);

        attempt.authenticate();
        assert_eq!(attempt.send(), 1);
        attempt.wait(Duration::from_millis(100));
        assert_eq!(attempt.send(), 2);
        attempt.succeed();

        let report = attempt.finish(None, Some(ResponseMeta { status_code: 200 }), Value::Null);
        assert!(report.is_success());
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn exhausted_and_permanent_differ_by_retryability() {
        let mut exhausted = DeliveryAttempt::new(Bytes::new());
        exhausted.authenticate();
        exhausted.send();
        exhausted.fail(true);
        assert_eq!(exhausted.state(), DeliveryState::Exhausted);

        let mut permanent = DeliveryAttempt::new(Bytes::new());
        permanent.authenticate();
        permanent.send();
        permanent.fail(false);
        assert_eq!(permanent.state(), DeliveryState::PermanentFailure);
    }

    #[test]
    fn gated_submission_makes_no_attempts() {
        let mut attempt = DeliveryAttempt::new(Bytes::new());
        attempt.gate();

        let report = attempt.finish(None, None, Value::Null);
        assert_eq!(report.state, DeliveryState::Gated);
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn transition_table() {
        use DeliveryState::*;

        assert!(Idle.can_transition_to(Gated));
        assert!(RetryWait.can_transition_to(Sending));
        assert!(!Gated.can_transition_to(Sending));
        assert!(!Success.can_transition_to(RetryWait));
        assert!(!Idle.can_transition_to(Sending));
        for state in [Gated, Success, PermanentFailure, Exhausted] {
            assert!(state.is_terminal());
        }
    }
}
