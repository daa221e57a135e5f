//! Submission of error events with gating, authentication and retries.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use bytes::Bytes;
use errata_core::{Clock, Configuration, ErrorEvent, ProjectIdLookup, RealClock};
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::{
    attempt::{DeliveryAttempt, DeliveryReport, ResponseMeta},
    auth::{report_url, resolve_auth, DefaultCredentials, TokenProvider},
    classify::{classify_response, ResponseClass},
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, ErrorCategory, Result},
    retry::{GiveUpReason, RetryContext, RetryDecision, RetryPolicy},
};

/// Completion callback: `(error, response metadata, response body)`.
pub type Callback = Box<dyn FnOnce(Option<DeliveryError>, Option<ResponseMeta>, Value) + Send>;

/// Client that submits [`ErrorEvent`]s to the aggregation service.
///
/// Cheap to clone; clones share configuration, credentials and the
/// project-id cache.
#[derive(Debug, Clone)]
pub struct ReportClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<Configuration>,
    transport: DeliveryClient,
    tokens: Arc<dyn TokenProvider>,
    project_lookup: Arc<dyn ProjectIdLookup>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

/// Builder for [`ReportClient`].
#[derive(Debug)]
pub struct ReportClientBuilder {
    config: Arc<Configuration>,
    client_config: ClientConfig,
    tokens: Option<Arc<dyn TokenProvider>>,
    project_lookup: Option<Arc<dyn ProjectIdLookup>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ReportClientBuilder {
    /// Overrides the HTTP client settings.
    #[must_use]
    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    /// Overrides the OAuth2 token source.
    #[must_use]
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Overrides the remote project-id lookup.
    #[must_use]
    pub fn project_lookup(mut self, lookup: Arc<dyn ProjectIdLookup>) -> Self {
        self.project_lookup = Some(lookup);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the clock used for backoff sleeps and token expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn build(self) -> Result<ReportClient> {
        let transport = DeliveryClient::new(self.client_config)?;

        let defaults = Arc::new(DefaultCredentials::new(
            &self.config,
            transport.http().clone(),
            self.clock.clone(),
        ));
        let tokens: Arc<dyn TokenProvider> = match self.tokens {
            Some(tokens) => tokens,
            None => defaults.clone(),
        };
        let project_lookup: Arc<dyn ProjectIdLookup> = match self.project_lookup {
            Some(lookup) => lookup,
            None => defaults,
        };

        Ok(ReportClient {
            inner: Arc::new(Inner {
                config: self.config,
                transport,
                tokens,
                project_lookup,
                policy: self.policy,
                clock: self.clock,
            }),
        })
    }
}

impl ReportClient {
    /// Starts building a client bound to `config`.
    pub fn builder(config: Arc<Configuration>) -> ReportClientBuilder {
        ReportClientBuilder {
            config,
            client_config: ClientConfig::default(),
            tokens: None,
            project_lookup: None,
            policy: RetryPolicy::default(),
            clock: Arc::new(RealClock::new()),
        }
    }

    /// Creates a client with default credentials, transport and retry policy.
    ///
    /// # Errors
    ///
    /// See [`ReportClientBuilder::build`].
    pub fn new(config: Arc<Configuration>) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Returns the configuration this client was built with.
    pub fn config(&self) -> &Arc<Configuration> {
        &self.inner.config
    }

    /// Submits an event and waits for the terminal outcome.
    ///
    /// Never panics and never retries beyond the policy's attempt ceiling.
    pub async fn send(&self, event: &ErrorEvent) -> DeliveryReport {
        let inner = &self.inner;

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                let mut attempt = DeliveryAttempt::new(Bytes::new());
                attempt.authenticate();
                attempt.fail(false);
                let error = DeliveryError::serialization(e.to_string());
                return attempt.finish(Some(error), None, Value::Null);
            },
        };

        let mut attempt = DeliveryAttempt::new(payload);
        let span = info_span!(
            "error_report",
            submission_id = %attempt.submission_id(),
            service = %event.service_context.service,
        );

        async move {
            if !inner.config.should_report_errors_to_api() {
                attempt.gate();
                let error = DeliveryError::reporting_disabled(inner.config.report_mode());
                tracing::debug!(error = %error, "error event not sent");
                return attempt.finish(Some(error), None, Value::Null);
            }

            attempt.authenticate();

            let lookup = inner.project_lookup.as_ref();
            let project_id = match inner.config.resolve_project_id(lookup).await {
                Ok(project_id) => project_id.to_string(),
                Err(e) => {
                    tracing::error!(error = %e, "error event not sent");
                    attempt.fail(false);
                    return attempt.finish(Some(e.into()), None, Value::Null);
                },
            };

            let auth = resolve_auth(&inner.config, inner.tokens.as_ref()).await;
            let url = match report_url(inner.config.api_endpoint(), &project_id, &auth) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(error = %e, "error event not sent");
                    attempt.fail(false);
                    return attempt.finish(Some(e), None, Value::Null);
                },
            };

            loop {
                let attempt_number = attempt.send();
                let request = DeliveryRequest {
                    submission_id: attempt.submission_id(),
                    url: url.clone(),
                    auth: auth.clone(),
                    body: attempt.payload().clone(),
                    attempt_number,
                };

                let (class, response, body) = match inner.transport.deliver(request).await {
                    Ok(response) => (
                        classify_response(
                            response.status_code,
                            response.retry_after,
                            &response.body,
                        ),
                        Some(ResponseMeta { status_code: response.status_code }),
                        response.body,
                    ),
                    Err(e) => (ResponseClass::from_error(e), None, Value::Null),
                };

                let error = match class {
                    ResponseClass::Success => {
                        tracing::info!(attempts = attempt_number, "error event reported");
                        attempt.succeed();
                        return attempt.finish(None, response, body);
                    },
                    ResponseClass::Transient(error) | ResponseClass::Permanent(error) => error,
                };

                let context =
                    RetryContext::new(attempt_number, &error, attempt.last_delay(), &inner.policy);
                match context.decide_retry() {
                    RetryDecision::Retry { delay } => {
                        tracing::warn!(
                            attempt = attempt_number,
                            delay_ms = delay.as_millis(),
                            category = %ErrorCategory::from(&error),
                            error = %error,
                            "error event submission failed; retrying"
                        );
                        attempt.wait(delay);
                        inner.clock.sleep(delay).await;
                    },
                    RetryDecision::GiveUp { reason } => {
                        attempt.fail(reason == GiveUpReason::AttemptsExhausted);
                        tracing::error!(
                            attempts = attempt_number,
                            state = %attempt.state(),
                            category = %ErrorCategory::from(&error),
                            error = %error,
                            "error event could not be reported"
                        );
                        return attempt.finish(Some(error), response, body);
                    },
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Submits an event in the background and returns it immediately.
    ///
    /// The callback, if any, receives the terminal outcome exactly once. When
    /// the report mode gates the event it is invoked before this method
    /// returns and no task is spawned. A panicking callback is caught and
    /// logged.
    pub fn send_error(&self, event: ErrorEvent, callback: Option<Callback>) -> ErrorEvent {
        if !self.inner.config.should_report_errors_to_api() {
            let error = DeliveryError::reporting_disabled(self.inner.config.report_mode());
            tracing::debug!(error = %error, "error event not sent");
            invoke_callback(callback, Some(error), None, Value::Null);
            return event;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let error =
                DeliveryError::configuration("no tokio runtime available to send the event");
            tracing::error!(error = %error, "error event not sent");
            invoke_callback(callback, Some(error), None, Value::Null);
            return event;
        };

        let client = self.clone();
        let submitted = event.clone();
        runtime.spawn(async move {
            let report = client.send(&submitted).await;
            let (error, response, body) = report.into_parts();
            invoke_callback(callback, error, response, body);
        });

        event
    }
}

fn invoke_callback(
    callback: Option<Callback>,
    error: Option<DeliveryError>,
    response: Option<ResponseMeta>,
    body: Value,
) {
    let Some(callback) = callback else {
        return;
    };

    if catch_unwind(AssertUnwindSafe(move || callback(error, response, body))).is_err() {
        tracing::error!("error report callback panicked");
    }
}
