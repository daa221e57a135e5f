//! Wire model for reported errors and the builder that produces it.
//!
//! The JSON shape matches the `events:report` request body:
//!
//! ```json
//! {
//!   "message": "...",
//!   "eventTime": "2024-05-01T12:00:00Z",
//!   "serviceContext": { "service": "checkout", "version": "1.4.2" },
//!   "context": {
//!     "httpRequest": { "method": "GET", "url": "/cart", "responseStatusCode": 500 },
//!     "user": "user-42",
//!     "reportLocation": { "filePath": "src/cart.rs", "lineNumber": 88, "functionName": "load" }
//!   }
//! }
//! ```

use std::{error::Error as StdError, fmt::Write as _, panic::Location};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::service::ServiceContext;

/// One reported error, as sent to the aggregation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Error text, including the cause chain.
    pub message: String,
    /// When the error occurred.
    #[serde(serialize_with = "rfc3339")]
    pub event_time: DateTime<Utc>,
    /// Reporting application.
    pub service_context: ServiceContext,
    /// Optional request, user, and source location details.
    #[serde(default, skip_serializing_if = "ErrorContext::is_empty")]
    pub context: ErrorContext,
}

/// Details surrounding a reported error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// HTTP request being served when the error occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestContext>,
    /// Identifier of the affected user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Source location that reported the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_location: Option<SourceLocation>,
}

impl ErrorContext {
    /// Returns true when no context field is set.
    pub fn is_empty(&self) -> bool {
        self.http_request.is_none() && self.user.is_none() && self.report_location.is_none()
    }
}

/// HTTP request details in wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestContext {
    /// HTTP method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `User-Agent` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// `Referer` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Response status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status_code: Option<u16>,
    /// Client address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
}

impl HttpRequestContext {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Source location that reported an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// Source file path.
    pub file_path: String,
    /// One-based line number.
    pub line_number: u32,
    /// Enclosing function, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self { file_path: location.file().to_string(), line_number: location.line(), function_name: None }
    }
}

/// Framework-neutral description of an HTTP request.
///
/// Web framework integrations fill one of these from their own request and
/// response types and hand it to [`ErrorMessage::request`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInformation {
    /// HTTP method.
    pub method: Option<String>,
    /// Request URL.
    pub url: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// `Referer` header.
    pub referrer: Option<String>,
    /// Response status code.
    pub status_code: Option<u16>,
    /// Client address.
    pub remote_address: Option<String>,
}

impl RequestInformation {
    /// Creates empty request information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the request URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the referrer.
    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Sets the response status code.
    #[must_use]
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn remote_address(mut self, remote_address: impl Into<String>) -> Self {
        self.remote_address = Some(remote_address.into());
        self
    }
}

/// Builder for [`ErrorEvent`].
///
/// # Example
///
/// ```
/// use errata_core::{ErrorMessage, RequestInformation, ServiceContext};
///
/// let event = ErrorMessage::new(ServiceContext::new("checkout", None))
///     .message("cart total overflowed")
///     .user("user-42")
///     .request(RequestInformation::new().method("POST").url("/cart").status_code(500))
///     .build();
///
/// assert_eq!(event.context.http_request.unwrap().response_status_code, Some(500));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    event: ErrorEvent,
}

impl ErrorMessage {
    /// Starts an event for `service_context`, timestamped now.
    pub fn new(service_context: ServiceContext) -> Self {
        Self::at(service_context, Utc::now())
    }

    /// Starts an event for `service_context` with an explicit event time.
    pub fn at(service_context: ServiceContext, event_time: DateTime<Utc>) -> Self {
        Self {
            event: ErrorEvent {
                message: String::new(),
                event_time,
                service_context,
                context: ErrorContext::default(),
            },
        }
    }

    /// Sets the message text.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Sets the message from an error and its chain of sources.
    #[must_use]
    pub fn error(mut self, error: &(dyn StdError + 'static)) -> Self {
        self.event.message = describe_error(error);
        self
    }

    /// Sets the event time.
    #[must_use]
    pub fn event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event.event_time = event_time;
        self
    }

    /// Replaces the service context.
    #[must_use]
    pub fn service_context(mut self, service_context: ServiceContext) -> Self {
        self.event.service_context = service_context;
        self
    }

    /// Sets the affected user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.event.context.user = Some(user.into());
        self
    }

    /// Sets the HTTP method of the request being served.
    #[must_use]
    pub fn http_method(self, method: impl Into<String>) -> Self {
        self.with_http(|http| http.method = Some(method.into()))
    }

    /// Sets the URL of the request being served.
    #[must_use]
    pub fn url(self, url: impl Into<String>) -> Self {
        self.with_http(|http| http.url = Some(url.into()))
    }

    /// Sets the `User-Agent` of the request being served.
    #[must_use]
    pub fn user_agent(self, user_agent: impl Into<String>) -> Self {
        self.with_http(|http| http.user_agent = Some(user_agent.into()))
    }

    /// Sets the referrer of the request being served.
    #[must_use]
    pub fn referrer(self, referrer: impl Into<String>) -> Self {
        self.with_http(|http| http.referrer = Some(referrer.into()))
    }

    /// Sets the response status code.
    #[must_use]
    pub fn response_status_code(self, status_code: u16) -> Self {
        self.with_http(|http| http.response_status_code = Some(status_code))
    }

    /// Sets the client address.
    #[must_use]
    pub fn remote_ip(self, remote_ip: impl Into<String>) -> Self {
        self.with_http(|http| http.remote_ip = Some(remote_ip.into()))
    }

    /// Copies every field present in `request` into the HTTP context.
    #[must_use]
    pub fn request(self, request: RequestInformation) -> Self {
        self.with_http(|http| {
            http.method = request.method.or(http.method.take());
            http.url = request.url.or(http.url.take());
            http.user_agent = request.user_agent.or(http.user_agent.take());
            http.referrer = request.referrer.or(http.referrer.take());
            http.response_status_code = request.status_code.or(http.response_status_code);
            http.remote_ip = request.remote_address.or(http.remote_ip.take());
        })
    }

    /// Sets the report location.
    #[must_use]
    pub fn location(mut self, location: SourceLocation) -> Self {
        self.event.context.report_location = Some(location);
        self
    }

    /// Sets the report location to the caller of this method.
    #[must_use]
    #[track_caller]
    pub fn caller_location(self) -> Self {
        self.location(Location::caller().into())
    }

    /// Sets the function name of the report location, if one is set.
    #[must_use]
    pub fn function_name(mut self, function_name: impl Into<String>) -> Self {
        if let Some(location) = self.event.context.report_location.as_mut() {
            location.function_name = Some(function_name.into());
        }
        self
    }

    /// Finishes the event.
    pub fn build(mut self) -> ErrorEvent {
        if self.event.context.http_request.as_ref().is_some_and(HttpRequestContext::is_empty) {
            self.event.context.http_request = None;
        }
        self.event
    }

    fn with_http(mut self, update: impl FnOnce(&mut HttpRequestContext)) -> Self {
        update(self.event.context.http_request.get_or_insert_with(HttpRequestContext::default));
        self
    }
}

/// Renders an error followed by each of its sources, one per line.
pub fn describe_error(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(message, "\n    caused by: {cause}");
        source = cause.source();
    }
    message
}

fn rfc3339<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
}
