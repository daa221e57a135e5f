//! Error types for error-event submission.
//!
//! Every failure a submission can end in is a [`DeliveryError`]. Errors carry
//! enough context for the retry policy to decide whether another attempt is
//! worthwhile, and for callers to see the server's own explanation.

use std::fmt;

use errata_core::{ProjectLookupError, ReportMode};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// HTTP status codes worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Error types for error-event submission.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The report mode forbids submission; no request was made.
    #[error("{message}")]
    ReportingDisabled {
        /// Mode that gated the submission.
        mode: ReportMode,
        /// Explanation naming the setting to change.
        message: String,
    },

    /// Neither an API key nor usable OAuth2 credentials could be obtained.
    #[error("unable to obtain credentials: {message}")]
    AuthResolution {
        /// Description of the failure.
        message: String,
    },

    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// HTTP 429 from the aggregation service.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Delay requested by the `Retry-After` header, if any.
        retry_after_seconds: Option<u64>,
        /// Server-provided error message.
        message: String,
    },

    /// HTTP response indicated client error (4xx other than 429).
    #[error("HTTP {status_code}: {message}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Server-provided error message.
        message: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("HTTP {status_code}: {message}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Server-provided error message.
        message: String,
    },

    /// HTTP response with a status outside the 2xx, 4xx and 5xx ranges.
    #[error("unexpected HTTP status {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// The project id was neither configured nor discoverable.
    #[error("{0}")]
    ProjectIdUnavailable(#[from] ProjectLookupError),

    /// The event could not be serialized.
    #[error("failed to serialize error event: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// Invalid client setup, such as an unparseable endpoint.
    #[error("invalid client configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates the error returned when the report mode gates a submission.
    pub fn reporting_disabled(mode: ReportMode) -> Self {
        let message = match mode {
            ReportMode::Never => {
                "error reporting is disabled because the reportMode configuration option is set \
                 to \"never\"; set it to \"production\" or \"always\" to report errors"
                    .to_string()
            },
            ReportMode::Production | ReportMode::Always => {
                "error reporting is disabled because the reportMode configuration option is \
                 \"production\" and the APP_ENV environment variable is not set to \
                 \"production\"; set reportMode to \"always\" to report errors regardless"
                    .to_string()
            },
        };
        Self::ReportingDisabled { mode, message }
    }

    /// Creates an authentication resolution error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthResolution { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>, message: impl Into<String>) -> Self {
        Self::RateLimited { retry_after_seconds, message: message.into() }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ClientError { status_code, message: message.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError { status_code, message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried.
    ///
    /// Returns `true` for network errors, timeouts, 429 and the 5xx statuses
    /// in [`RETRYABLE_STATUS_CODES`]. Every other failure is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,

            Self::ServerError { status_code, .. } => RETRYABLE_STATUS_CODES.contains(status_code),

            Self::ReportingDisabled { .. }
            | Self::AuthResolution { .. }
            | Self::ClientError { .. }
            | Self::UnexpectedStatus { .. }
            | Self::ProjectIdUnavailable(_)
            | Self::Serialization { .. }
            | Self::ConfigurationError { .. } => false,
        }
    }

    /// Returns the server's `Retry-After` guidance in seconds, if any.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds, .. } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Returns the HTTP status code when the error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }

    /// Returns the message the server gave for rejecting the event.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::RateLimited { message, .. }
            | Self::ClientError { message, .. }
            | Self::ServerError { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Submission gated by the report mode.
    Disabled,
    /// Credential problems.
    Auth,
    /// Network connectivity issues.
    Network,
    /// Rate limiting.
    RateLimit,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and unexpected statuses.
    Server,
    /// Local configuration or serialization problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::ReportingDisabled { .. } => Self::Disabled,
            DeliveryError::AuthResolution { .. } => Self::Auth,
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } | DeliveryError::UnexpectedStatus { .. } => {
                Self::Server
            },
            DeliveryError::ProjectIdUnavailable(_)
            | DeliveryError::Serialization { .. }
            | DeliveryError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Auth => write!(f, "auth"),
            Self::Network => write!(f, "network"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
