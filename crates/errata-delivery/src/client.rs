//! HTTP transport for error event submission.
//!
//! Sends one request per call and reports what came back. Retrying and
//! classification live in the reporter; this layer only distinguishes a
//! response (of any status) from a transport failure.

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug_span, Instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::RequestAuth,
    classify::parse_body,
    error::{DeliveryError, Result},
};

/// Largest response body kept for callers and logs.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the submission HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for each HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("errata/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP client for the aggregation service.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// One HTTP request of a submission.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Submission this request belongs to.
    pub submission_id: Uuid,
    /// Fully built `events:report` URL, including any API key.
    pub url: Url,
    /// Authentication for the request.
    pub auth: RequestAuth,
    /// Serialized event.
    pub body: Bytes,
    /// Attempt number (1-based).
    pub attempt_number: u32,
}

/// Response to a submission request.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Parsed response body; non-JSON text is kept as a string value.
    pub body: Value,
    /// Seconds requested by a `Retry-After` header.
    pub retry_after: Option<u64>,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

impl DeliveryClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new client with default configuration.
    ///
    /// # Errors
    ///
    /// See [`DeliveryClient::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the underlying HTTP client, shared with credential requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends one request.
    ///
    /// Any HTTP response, including 4xx and 5xx, is returned as `Ok`.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `NetworkError` for connection and other transport failures
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = Instant::now();

        let span = debug_span!(
            "report_request",
            submission_id = %request.submission_id,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!(url = %redacted(&request.url), "sending error event");

            let mut http_request = self
                .client
                .post(request.url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.clone());

            if let RequestAuth::Bearer(token) = &request.auth {
                http_request = http_request.header(AUTHORIZATION, format!("Bearer {token}"));
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.without_url().to_string()));
                },
            };

            let status_code = response.status().as_u16();
            let retry_after = extract_retry_after_seconds(response.headers(), Utc::now());

            let body = match response.bytes().await {
                Ok(bytes) => parse_body(truncate(&bytes)),
                Err(e) => {
                    tracing::warn!("failed to read response body: {}", e);
                    Value::Null
                },
            };

            let duration = start_time.elapsed();
            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            Ok(DeliveryResponse { status_code, body, retry_after, duration })
        }
        .instrument(span)
        .await
    }
}

fn truncate(bytes: &Bytes) -> &[u8] {
    &bytes[..bytes.len().min(MAX_RESPONSE_BODY_SIZE)]
}

/// Renders a request URL for logs with the API key removed.
pub fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "key" { "REDACTED".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

/// Extracts the retry-after delay from response headers.
///
/// Supports both seconds and HTTP-date formats. Dates in the past yield zero;
/// unparseable values are ignored.
pub fn extract_retry_after_seconds(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let retry_after = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    let retry_time = DateTime::parse_from_rfc2822(retry_after).ok()?.with_timezone(&Utc);
    let seconds = retry_time.signed_duration_since(now).num_seconds();
    Some(u64::try_from(seconds).unwrap_or(0))
}
