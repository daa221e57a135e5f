//! Application-facing facade.
//!
//! [`ErrorReporting`] resolves configuration from the process environment,
//! owns a [`ReportClient`] and turns errors, messages and panics into
//! submitted events.
//!
//! # Example
//!
//! ```no_run
//! use errata_core::{ReportMode, ReporterOptions};
//! use errata_delivery::ErrorReporting;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let errors = ErrorReporting::new(
//!     &ReporterOptions::new()
//!         .project_id("my-project")
//!         .report_mode(ReportMode::Always)
//!         .report_unhandled_rejections(true),
//! )?;
//!
//! if let Err(e) = std::fs::read("settings.json") {
//!     errors.report(&e);
//! }
//! # Ok(())
//! # }
//! ```

use std::{any::Any, error::Error as StdError, panic::Location, sync::Arc, sync::Once};

use errata_core::{ConfigError, Configuration, ErrorEvent, ErrorMessage, ReporterOptions};
use thiserror::Error;

use crate::{
    error::DeliveryError,
    reporter::{Callback, ReportClient},
};

static PANIC_HOOK: Once = Once::new();

/// Failure to set up error reporting.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The options did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Error reporting facade.
#[derive(Debug, Clone)]
pub struct ErrorReporting {
    client: ReportClient,
}

impl ErrorReporting {
    /// Resolves `options` against the process environment and builds a client.
    ///
    /// When `reportUnhandledRejections` is enabled a panic hook is installed.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Config`] listing every invalid option.
    pub fn new(options: &ReporterOptions) -> Result<Self, SetupError> {
        let config = Configuration::from_env(options)?;
        let client = ReportClient::new(Arc::new(config))?;
        Ok(Self::from_client(client))
    }

    /// Wraps an existing client, installing the panic hook if configured.
    pub fn from_client(client: ReportClient) -> Self {
        let reporting = Self { client };
        if reporting.client.config().report_unhandled_rejections() {
            reporting.install_panic_hook();
        }
        reporting
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &ReportClient {
        &self.client
    }

    /// Starts an event prefilled with the service context.
    pub fn event(&self) -> ErrorMessage {
        ErrorMessage::new(self.client.config().service_context().clone())
    }

    /// Reports an error and its sources from the caller's location.
    #[track_caller]
    pub fn report(&self, error: &(dyn StdError + 'static)) -> ErrorEvent {
        self.report_error(error, Location::caller(), None)
    }

    /// Like [`ErrorReporting::report`], invoking `callback` with the outcome.
    #[track_caller]
    pub fn report_with(&self, error: &(dyn StdError + 'static), callback: Callback) -> ErrorEvent {
        self.report_error(error, Location::caller(), Some(callback))
    }

    /// Reports a plain message from the caller's location.
    #[track_caller]
    pub fn report_message(&self, message: impl Into<String>) -> ErrorEvent {
        let event = self.event().message(message).location(Location::caller().into()).build();
        self.client.send_error(event, None)
    }

    /// Sends a fully built event.
    pub fn send(&self, event: ErrorEvent, callback: Option<Callback>) -> ErrorEvent {
        self.client.send_error(event, callback)
    }

    fn report_error(
        &self,
        error: &(dyn StdError + 'static),
        location: &'static Location<'static>,
        callback: Option<Callback>,
    ) -> ErrorEvent {
        let event = self.event().error(error).location(location.into()).build();
        self.client.send_error(event, callback)
    }

    /// Installs a process-wide hook reporting every panic, then running the
    /// previously installed hook.
    ///
    /// Only the first call in a process installs the hook. Reports are sent
    /// in the background, so a panic that terminates the process may exit
    /// before its report is delivered.
    pub fn install_panic_hook(&self) {
        let client = self.client.clone();
        PANIC_HOOK.call_once(move || {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let message = format!("panicked: {}", panic_message(info.payload()));
                let mut event =
                    ErrorMessage::new(client.config().service_context().clone()).message(message);
                if let Some(location) = info.location() {
                    event = event.location(location.into());
                }
                client.send_error(event.build(), None);
                previous(info);
            }));
            tracing::debug!("panic reporting hook installed");
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>")
}

#[cfg(test)]
mod tests {
    use errata_core::{ReportMode, ServiceContext, StaticEnvironment};

    use super::*;

    fn reporting() -> ErrorReporting {
        let options =
            ReporterOptions::new().service("billing").version("3").report_mode(ReportMode::Never);
        let config = Configuration::new(&options, StaticEnvironment::new().shared()).unwrap();
        ErrorReporting::from_client(ReportClient::new(Arc::new(config)).unwrap())
    }

    #[test]
    fn report_records_caller_and_sources() {
        let error = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");

        let line = line!() + 1;
        let event = reporting().report(&error);

        assert_eq!(event.message, "disk on fire");
        assert_eq!(event.service_context, ServiceContext::new("billing", Some("3".into())));
        let location = event.context.report_location.unwrap();
        assert!(location.file_path.ends_with("reporting.rs"));
        assert_eq!(location.line_number, line);
    }

    #[test]
    fn report_message_builds_event() {
        let event = reporting().report_message("quota exceeded");

        assert_eq!(event.message, "quota exceeded");
        assert!(event.context.report_location.is_some());
    }

    #[test]
    fn event_is_prefilled_with_service_context() {
        let event = reporting().event().message("x").build();
        assert_eq!(event.service_context.service, "billing");
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let text: Box<dyn Any + Send> = Box::new("static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(text.as_ref()), "static text");
        assert_eq!(panic_message(owned.as_ref()), "owned text");
        assert_eq!(panic_message(other.as_ref()), "Box<dyn Any>");
    }
}
