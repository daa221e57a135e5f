//! Classification of aggregation-service responses.
//!
//! The service answers with `2xx` and an (often empty) JSON object on success,
//! or a Google API error envelope:
//!
//! ```json
//! { "error": { "code": 400, "message": "Message cannot be empty.", "status": "INVALID_ARGUMENT" } }
//! ```
//!
//! The envelope's `message` is surfaced to callers verbatim.

use serde_json::Value;

use crate::error::DeliveryError;

/// Outcome of a single HTTP exchange.
#[derive(Debug, Clone)]
pub enum ResponseClass {
    /// 2xx; the event was accepted.
    Success,
    /// The attempt failed in a way worth retrying.
    Transient(DeliveryError),
    /// The attempt failed and retrying cannot help.
    Permanent(DeliveryError),
}

impl ResponseClass {
    /// Classifies a delivery error produced before any response arrived.
    pub fn from_error(error: DeliveryError) -> Self {
        if error.is_retryable() {
            Self::Transient(error)
        } else {
            Self::Permanent(error)
        }
    }

    /// Returns true for [`ResponseClass::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Classifies an HTTP response by status, `Retry-After` and body.
pub fn classify_response(status_code: u16, retry_after: Option<u64>, body: &Value) -> ResponseClass {
    if (200..300).contains(&status_code) {
        return ResponseClass::Success;
    }

    let message = server_message(body).unwrap_or_else(|| default_reason(status_code).to_string());

    let error = match status_code {
        429 => DeliveryError::rate_limited(retry_after, message),
        400..=499 => DeliveryError::client_error(status_code, message),
        500..=599 => DeliveryError::server_error(status_code, message),
        _ => DeliveryError::UnexpectedStatus { status_code },
    };

    ResponseClass::from_error(error)
}

/// Extracts `error.message` from a Google API error envelope, falling back to
/// a top-level `message` or a plain string body.
pub fn server_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Object(object) => object
            .get("error")
            .and_then(|error| match error {
                Value::Object(error) => error.get("message").and_then(Value::as_str),
                Value::String(message) => Some(message.as_str()),
                _ => None,
            })
            .or_else(|| object.get("message").and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Parses a response body as JSON, keeping non-JSON text as a string value.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn default_reason(status_code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("unrecognized status")
}
