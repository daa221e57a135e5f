//! Delivery of error events to the Cloud Error Reporting API.
//!
//! Takes a resolved [`errata_core::Configuration`] and submits
//! [`errata_core::ErrorEvent`]s over HTTPS with bounded, in-memory retries.
//!
//! # Architecture
//!
//! Each submission is a short state machine ([`DeliveryState`]):
//!
//! 1. **Gate** - the report mode decides whether anything is sent at all
//! 2. **Authenticate** - API key, or an OAuth2 token from the credential chain
//! 3. **Send** - one HTTP request per attempt
//! 4. **Classify** - success, transient failure or permanent failure
//! 5. **Back off** - exponential delay with jitter before the next attempt
//!
//! Submissions share nothing but configuration, credentials and the
//! project-id cache, so concurrent reports never wait on each other.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use errata_core::{Configuration, ErrorMessage, ReportMode, ReporterOptions};
//! use errata_delivery::ReportClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ReporterOptions::new().project_id("my-project").report_mode(ReportMode::Always);
//! let config = Arc::new(Configuration::from_env(&options)?);
//! let client = ReportClient::new(config.clone())?;
//!
//! let event = ErrorMessage::new(config.service_context().clone()).message("boom").build();
//! let report = client.send(&event).await;
//! println!("{} after {} attempts", report.state, report.attempts);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod auth;
pub mod classify;
pub mod client;
pub mod error;
pub mod reporter;
pub mod reporting;
pub mod retry;

pub use attempt::{DeliveryReport, DeliveryState, ResponseMeta};
pub use auth::{DefaultCredentials, MetadataServer, RequestAuth, TokenProvider};
pub use client::{ClientConfig, DeliveryClient};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use reporter::{Callback, ReportClient, ReportClientBuilder};
pub use reporting::{ErrorReporting, SetupError};
pub use retry::{BackoffStrategy, RetryPolicy};

/// Default number of HTTP requests per submission.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
