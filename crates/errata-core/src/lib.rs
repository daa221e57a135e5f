//! Configuration resolution and wire model for the errata error reporting
//! client.
//!
//! Resolves user options, platform signals and environment variables into a
//! single validated [`Configuration`], and defines the [`ErrorEvent`] payload
//! that the delivery crate submits to the aggregation service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod event;
pub mod mode;
pub mod options;
pub mod project;
pub mod service;
pub mod time;

pub use config::{Configuration, DEFAULT_API_ENDPOINT};
pub use env::{Environment, ProcessEnvironment, StaticEnvironment};
pub use error::{ConfigError, ProjectLookupError, Result, ValidationError};
pub use event::{
    describe_error, ErrorContext, ErrorEvent, ErrorMessage, HttpRequestContext,
    RequestInformation, SourceLocation,
};
pub use mode::{LogLevel, ReportMode};
pub use options::ReporterOptions;
pub use project::{ProjectIdCache, ProjectIdLookup};
pub use service::ServiceContext;
pub use time::{Clock, RealClock, TestClock};
