//! Report mode and log level enumerations.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Policy controlling whether error events are transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Report only when the deployment environment flag says `production`.
    #[default]
    Production,
    /// Always report.
    Always,
    /// Never report.
    Never,
}

impl ReportMode {
    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no report mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReportMode(pub String);

impl fmt::Display for UnknownReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown report mode {:?}", self.0)
    }
}

impl std::error::Error for UnknownReportMode {}

impl FromStr for ReportMode {
    type Err = UnknownReportMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            _ => Err(UnknownReportMode(s.to_string())),
        }
    }
}

/// Verbosity of the client's own logging, numbered 0 (silent) to 5 (trace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum LogLevel {
    /// No output.
    Silent = 0,
    /// Errors only.
    Error = 1,
    /// Errors and warnings.
    #[default]
    Warn = 2,
    /// Informational messages.
    Info = 3,
    /// Debug output.
    Debug = 4,
    /// Everything.
    Trace = 5,
}

impl LogLevel {
    /// Maps a numeric level to a [`LogLevel`].
    pub const fn from_number(level: u64) -> Option<Self> {
        match level {
            0 => Some(Self::Silent),
            1 => Some(Self::Error),
            2 => Some(Self::Warn),
            3 => Some(Self::Info),
            4 => Some(Self::Debug),
            5 => Some(Self::Trace),
            _ => None,
        }
    }

    /// Returns the `tracing` filter directive for this level.
    pub const fn directive(&self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}
