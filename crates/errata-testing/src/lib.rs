//! Test harness for errata integration tests.
//!
//! Provides a mock aggregation service, a virtual clock, counting credential
//! doubles and fixture builders so that delivery behaviour can be asserted
//! without network access or real sleeps.

pub mod doubles;
pub mod fixtures;
pub mod http;

use std::sync::Arc;

use anyhow::Result;
pub use doubles::{CountingTokenProvider, StaticProjectLookup};
use errata_core::{Configuration, ReporterOptions, StaticEnvironment, TestClock};
use errata_delivery::{ReportClient, RetryPolicy};
pub use fixtures::{reporting_options, sample_event, sample_message, TEST_PROJECT_ID};
pub use http::MockApi;
use tracing_subscriber::EnvFilter;

/// Token handed out by the default [`TestEnv`] token provider.
pub const TEST_TOKEN: &str = "ya29.test-token";

/// Test environment with all necessary infrastructure.
pub struct TestEnv {
    /// Mock aggregation service.
    pub api: MockApi,
    /// Virtual clock; records every backoff sleep.
    pub clock: TestClock,
    /// Token source used when no API key is configured.
    pub tokens: Arc<CountingTokenProvider>,
    /// Remote project-id lookup.
    pub lookup: Arc<StaticProjectLookup>,
    /// Retry policy for clients built by this environment.
    pub policy: RetryPolicy,
}

impl TestEnv {
    /// Creates a test environment with defaults.
    pub async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,errata=debug")),
            )
            .with_test_writer()
            .try_init();

        Self {
            api: MockApi::start().await,
            clock: TestClock::new(),
            tokens: Arc::new(CountingTokenProvider::new(TEST_TOKEN)),
            lookup: Arc::new(StaticProjectLookup::unavailable()),
            policy: RetryPolicy::default(),
        }
    }

    /// Options that always report to the mock service.
    pub fn options(&self) -> ReporterOptions {
        reporting_options(&self.api.uri())
    }

    /// Resolves `options` against an empty environment.
    pub fn configuration(&self, options: &ReporterOptions) -> Result<Arc<Configuration>> {
        self.configuration_with_env(options, StaticEnvironment::new())
    }

    /// Resolves `options` against `env`.
    pub fn configuration_with_env(
        &self,
        options: &ReporterOptions,
        env: StaticEnvironment,
    ) -> Result<Arc<Configuration>> {
        Ok(Arc::new(Configuration::new(options, env.shared())?))
    }

    /// Builds a client wired to this environment's doubles and clock.
    pub fn client(&self, options: &ReporterOptions) -> Result<ReportClient> {
        self.client_for(self.configuration(options)?)
    }

    /// Builds a client for an already resolved configuration.
    pub fn client_for(&self, config: Arc<Configuration>) -> Result<ReportClient> {
        let client = ReportClient::builder(config)
            .token_provider(self.tokens.clone())
            .project_lookup(self.lookup.clone())
            .retry_policy(self.policy.clone())
            .clock(Arc::new(self.clock.clone()))
            .build()?;
        Ok(client)
    }
}
