//! End-to-end submission behaviour against a mock aggregation service.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use errata_core::{ReportMode, ReporterOptions, StaticEnvironment};
use errata_delivery::{DeliveryError, DeliveryState, ResponseMeta};
use errata_testing::{
    sample_event, CountingTokenProvider, MockApi, StaticProjectLookup, TestEnv, TEST_PROJECT_ID,
    TEST_TOKEN,
};
use serde_json::{json, Value};

#[tokio::test]
async fn rate_limited_three_times_then_accepted() -> Result<()> {
    let env = TestEnv::new().await;
    env.api
        .sequence()
        .respond_times(3, 429, json!({"error": {"message": "Quota exceeded"}}))
        .respond_with(200, json!({}))
        .mount()
        .await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::Success);
    assert_eq!(report.attempts, 4);
    assert!(report.error.is_none());
    assert_eq!(report.response, Some(ResponseMeta { status_code: 200 }));
    env.api.assert_request_count(4).await;
    assert_eq!(env.clock.sleeps().len(), 3);
    Ok(())
}

#[tokio::test]
async fn rate_limited_on_every_attempt_is_exhausted() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(429, json!({"error": {"message": "Quota exceeded"}})).await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::Exhausted);
    assert!(report.is_exhausted());
    assert_eq!(report.attempts, 4);
    assert!(matches!(report.error, Some(DeliveryError::RateLimited { .. })));
    assert_eq!(report.response, Some(ResponseMeta { status_code: 429 }));
    env.api.assert_request_count(4).await;
    Ok(())
}

#[tokio::test]
async fn client_error_is_not_retried_and_surfaces_server_message() -> Result<()> {
    let env = TestEnv::new().await;
    let envelope = json!({
        "error": {"code": 400, "message": "Message cannot be empty.", "status": "INVALID_ARGUMENT"}
    });
    env.api.respond(400, envelope.clone()).await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::PermanentFailure);
    assert_eq!(report.attempts, 1);
    let error = report.error.expect("permanent failure carries an error");
    assert_eq!(error.status_code(), Some(400));
    assert_eq!(error.server_message(), Some("Message cannot be empty."));
    assert_eq!(error.to_string(), "HTTP 400: Message cannot be empty.");
    assert_eq!(report.body, envelope);
    env.api.assert_request_count(1).await;
    assert!(env.clock.sleeps().is_empty());
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried() -> Result<()> {
    let env = TestEnv::new().await;
    env.api
        .sequence()
        .respond_with(500, json!({}))
        .respond_with(503, json!({}))
        .respond_with(200, json!({}))
        .mount()
        .await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 3);
    Ok(())
}

#[tokio::test]
async fn backoff_grows_monotonically_within_cap() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(503, json!({})).await;
    let client = env.client(&env.options())?;

    client.send(&sample_event()).await;

    let sleeps = env.clock.sleeps();
    assert_eq!(sleeps.len(), 3);
    assert!(sleeps[0] >= Duration::from_millis(100));
    assert!(sleeps.windows(2).all(|pair| pair[0] <= pair[1]), "{sleeps:?}");
    assert!(sleeps.iter().all(|delay| *delay <= Duration::from_secs(2)), "{sleeps:?}");
    Ok(())
}

#[tokio::test]
async fn retry_after_is_honoured_up_to_cap() -> Result<()> {
    let mut env = TestEnv::new().await;
    env.policy = env.policy.clone().without_jitter();
    env.api
        .sequence()
        .respond_with_retry_after(429, 1)
        .respond_with_retry_after(429, 3600)
        .respond_with(200, json!({}))
        .mount()
        .await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert!(report.is_success());
    assert_eq!(env.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_exhausted_as_network_error() -> Result<()> {
    let env = TestEnv::new().await;
    let options = env.options().api_endpoint("http://127.0.0.1:1");
    let client = env.client(&options)?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::Exhausted);
    assert_eq!(report.attempts, 4);
    assert!(matches!(report.error, Some(DeliveryError::NetworkError { .. })));
    assert_eq!(report.response, None);
    Ok(())
}

#[tokio::test]
async fn production_mode_outside_production_sends_nothing() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(200, json!({})).await;
    let client = env.client(&env.options().report_mode(ReportMode::Production))?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::Gated);
    assert!(matches!(report.error, Some(DeliveryError::ReportingDisabled { .. })));
    env.api.assert_request_count(0).await;
    assert_eq!(env.tokens.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn production_mode_in_production_sends() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(200, json!({})).await;
    let config = env.configuration_with_env(
        &env.options().report_mode(ReportMode::Production),
        StaticEnvironment::new().with("APP_ENV", "production"),
    )?;
    let client = env.client_for(config)?;

    assert!(client.send(&sample_event()).await.is_success());
    env.api.assert_request_count(1).await;
    Ok(())
}

#[tokio::test]
async fn never_mode_sends_nothing_even_in_production() -> Result<()> {
    let env = TestEnv::new().await;
    let config = env.configuration_with_env(
        &env.options().report_mode(ReportMode::Never),
        StaticEnvironment::new().with("APP_ENV", "production"),
    )?;
    let client = env.client_for(config)?;

    assert_eq!(client.send(&sample_event()).await.state, DeliveryState::Gated);
    env.api.assert_request_count(0).await;
    Ok(())
}

#[tokio::test]
async fn api_key_is_sent_as_query_parameter_without_token() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(200, json!({})).await;
    let client = env.client(&env.options().key("api-key-123"))?;

    let report = client.send(&sample_event()).await;

    assert!(report.is_success());
    assert_eq!(env.tokens.calls(), 0);
    let requests = env.api.received_requests().await;
    assert_eq!(requests.len(), 1);
    let key = requests[0].url.query_pairs().find(|(name, _)| name == "key").map(|(_, v)| v);
    assert_eq!(key.as_deref(), Some("api-key-123"));
    assert!(requests[0].headers.get("authorization").is_none());
    Ok(())
}

#[tokio::test]
async fn bearer_token_is_sent_without_key() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(200, json!({})).await;
    let client = env.client(&env.options())?;

    client.send(&sample_event()).await;

    assert_eq!(env.tokens.calls(), 1);
    let requests = env.api.received_requests().await;
    let authorization = requests[0].headers.get("authorization").and_then(|v| v.to_str().ok());
    assert_eq!(authorization, Some(format!("Bearer {TEST_TOKEN}").as_str()));
    assert!(requests[0].url.query().is_none());
    Ok(())
}

#[tokio::test]
async fn request_targets_project_and_carries_event() -> Result<()> {
    let env = TestEnv::new().await;
    env.api.respond(200, json!({})).await;
    let client = env.client(&env.options())?;

    client.send(&sample_event()).await;

    let requests = env.api.received_requests().await;
    assert_eq!(requests[0].url.path(), MockApi::report_path(TEST_PROJECT_ID));
    let body: Value = requests[0].body_json()?;
    assert_eq!(body["message"], "TypeError: cannot read property 'id' of undefined");
    assert_eq!(body["serviceContext"], json!({"service": "checkout", "version": "1.4.2"}));
    assert_eq!(body["eventTime"], "2024-05-01T12:00:00.000Z");
    assert!(body.get("context").is_none());
    Ok(())
}

#[tokio::test]
async fn discovered_project_id_is_looked_up_once() -> Result<()> {
    let mut env = TestEnv::new().await;
    env.lookup = Arc::new(StaticProjectLookup::new("discovered-project"));
    errata_testing::http::mount_report(&env.api, "discovered-project", 200, json!({})).await;
    let options = ReporterOptions::new()
        .report_mode(ReportMode::Always)
        .api_endpoint(env.api.uri());
    let client = env.client(&options)?;

    assert!(client.send(&sample_event()).await.is_success());
    assert!(client.send(&sample_event()).await.is_success());

    assert_eq!(env.lookup.calls(), 1);
    env.api.assert_request_count(2).await;
    Ok(())
}

#[tokio::test]
async fn missing_project_id_fails_without_request() -> Result<()> {
    let env = TestEnv::new().await;
    let options = ReporterOptions::new()
        .report_mode(ReportMode::Always)
        .api_endpoint(env.api.uri());
    let client = env.client(&options)?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::PermanentFailure);
    assert_eq!(report.attempts, 0);
    assert!(matches!(report.error, Some(DeliveryError::ProjectIdUnavailable(_))));
    env.api.assert_request_count(0).await;
    Ok(())
}

#[tokio::test]
async fn token_failure_still_sends_unauthenticated() -> Result<()> {
    let mut env = TestEnv::new().await;
    env.tokens = Arc::new(CountingTokenProvider::failing());
    let envelope = json!({"error": {"message": "Request is missing required authentication credential."}});
    env.api.respond(401, envelope).await;
    let client = env.client(&env.options())?;

    let report = client.send(&sample_event()).await;

    assert_eq!(report.state, DeliveryState::PermanentFailure);
    assert_eq!(report.error.and_then(|e| e.status_code()), Some(401));
    let requests = env.api.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
    Ok(())
}
