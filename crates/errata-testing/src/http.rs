//! Mock aggregation service.

use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

/// Mock `events:report` endpoint backed by a wiremock server.
pub struct MockApi {
    server: MockServer,
}

impl MockApi {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL, suitable for the `apiEndpoint` option.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The wrapped server, for mounting custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Request path a submission for `project_id` is sent to.
    pub fn report_path(project_id: &str) -> String {
        format!("/v1beta1/projects/{project_id}/events:report")
    }

    /// Answers every submission with `status` and a JSON `body`.
    pub async fn respond(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Starts a sequence of one-shot responses, served in order.
    pub fn sequence(&self) -> ResponseSequence<'_> {
        ResponseSequence { server: &self.server, responses: Vec::new() }
    }

    /// Returns all requests received so far.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.received_requests().await.len()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.request_count().await;
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }
}

/// Builder for ordered one-shot responses.
pub struct ResponseSequence<'a> {
    server: &'a MockServer,
    responses: Vec<ResponseTemplate>,
}

impl ResponseSequence<'_> {
    /// Adds a response with a JSON body.
    #[must_use]
    pub fn respond_with(mut self, status: u16, body: Value) -> Self {
        self.responses.push(ResponseTemplate::new(status).set_body_json(body));
        self
    }

    /// Adds `count` identical responses.
    #[must_use]
    pub fn respond_times(mut self, count: usize, status: u16, body: Value) -> Self {
        for _ in 0..count {
            self = self.respond_with(status, body.clone());
        }
        self
    }

    /// Adds a response carrying a `Retry-After` header.
    #[must_use]
    pub fn respond_with_retry_after(mut self, status: u16, seconds: u64) -> Self {
        self.responses
            .push(ResponseTemplate::new(status).insert_header("Retry-After", seconds.to_string()));
        self
    }

    /// Mounts the sequence. Each response is served once, in insertion order.
    pub async fn mount(self) {
        for response in self.responses {
            Mock::given(method("POST"))
                .respond_with(response)
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

/// Mounts a mock that only answers submissions for `project_id`.
pub async fn mount_report(api: &MockApi, project_id: &str, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path(MockApi::report_path(project_id)))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(api.server())
        .await;
}
