//! Error types for configuration resolution.
//!
//! Construction of a [`Configuration`](crate::Configuration) is all or
//! nothing: every field is validated and every failure is collected into a
//! single [`ConfigError::Invalid`], so callers see the complete list of
//! problems at once and never a partially resolved configuration.

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// A single invalid option.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `key` present but not a string.
    #[error("config.key must be a string")]
    Key,

    /// `keyFilename` present but not a string.
    #[error("config.keyFilename must be a string")]
    KeyFilename,

    /// `credentials` present but not an object.
    #[error("config.credentials must be a valid credentials object")]
    Credentials,

    /// `reportUnhandledRejections` present but not a boolean.
    #[error("config.reportUnhandledRejections must be a boolean")]
    ReportUnhandledRejections,

    /// `ignoreEnvironmentCheck` present but not a boolean.
    #[error("config.ignoreEnvironmentCheck must be a boolean")]
    IgnoreEnvironmentCheck,

    /// `reportMode` present but not one of the recognized modes.
    #[error(
        "config.reportMode must be a string that is one of \"production\", \"always\", or \
         \"never\" (got {value})"
    )]
    ReportMode {
        /// The rejected value, rendered as JSON.
        value: String,
    },

    /// `serviceContext` present but not an object.
    #[error("config.serviceContext must be an object")]
    ServiceContext,

    /// `serviceContext.service` present but not a string.
    #[error("config.serviceContext.service must be a string")]
    Service,

    /// `serviceContext.version` present but not a string.
    #[error("config.serviceContext.version must be a string")]
    Version,

    /// `projectId` present but neither a string nor a number.
    #[error("config.projectId must be a string or a number")]
    ProjectId,

    /// `apiEndpoint` present but not a non-empty string.
    #[error("config.apiEndpoint must be a non-empty string")]
    ApiEndpoint,

    /// `logLevel` present but not an integer in `0..=5`.
    #[error("config.logLevel must be an integer between 0 and 5")]
    LogLevel,
}

impl ValidationError {
    /// Returns the option path this error refers to.
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::KeyFilename => "keyFilename",
            Self::Credentials => "credentials",
            Self::ReportUnhandledRejections => "reportUnhandledRejections",
            Self::IgnoreEnvironmentCheck => "ignoreEnvironmentCheck",
            Self::ReportMode { .. } => "reportMode",
            Self::ServiceContext => "serviceContext",
            Self::Service => "serviceContext.service",
            Self::Version => "serviceContext.version",
            Self::ProjectId => "projectId",
            Self::ApiEndpoint => "apiEndpoint",
            Self::LogLevel => "logLevel",
        }
    }
}

/// Errors raised while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more options failed validation.
    #[error("invalid configuration: {}", ErrorList(errors))]
    Invalid {
        /// Every validation failure, in option order.
        errors: Vec<ValidationError>,
    },

    /// Options were supplied as something other than an object.
    #[error("configuration options must be an object")]
    NotAnObject,

    /// An options file could not be read or parsed.
    #[error("failed to load configuration from {}: {message}", path.display())]
    Load {
        /// File that was being loaded.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
}

impl ConfigError {
    /// Returns the validation failures, empty for non-validation errors.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Invalid { errors } => errors,
            Self::NotAnObject | Self::Load { .. } => &[],
        }
    }

    /// Returns true if `error` is among the validation failures.
    pub fn contains(&self, error: &ValidationError) -> bool {
        self.validation_errors().contains(error)
    }
}

struct ErrorList<'a>(&'a [ValidationError]);

impl fmt::Display for ErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Failure of a remote project-id lookup.
#[derive(Debug, Clone, Error)]
#[error("unable to determine project id: {message}")]
pub struct ProjectLookupError {
    /// Description of the failure.
    pub message: String,
}

impl ProjectLookupError {
    /// Creates a lookup error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_lists_every_failure() {
        let error = ConfigError::Invalid {
            errors: vec![ValidationError::Key, ValidationError::ReportUnhandledRejections],
        };

        assert_eq!(
            error.to_string(),
            "invalid configuration: config.key must be a string; \
             config.reportUnhandledRejections must be a boolean"
        );
        assert!(error.contains(&ValidationError::Key));
        assert!(!error.contains(&ValidationError::KeyFilename));
    }

    #[test]
    fn field_paths_match_option_names() {
        assert_eq!(ValidationError::Service.field(), "serviceContext.service");
        assert_eq!(ValidationError::ReportMode { value: "\"x\"".into() }.field(), "reportMode");
        assert!(ConfigError::NotAnObject.validation_errors().is_empty());
    }
}
