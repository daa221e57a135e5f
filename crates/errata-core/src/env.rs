//! Environment access for configuration resolution.
//!
//! Configuration never reads the process environment directly. It consults an
//! injected [`Environment`], so tests can resolve configuration against a
//! fixed set of variables without touching process-wide state.

use std::{collections::HashMap, fmt, sync::Arc};

/// Cloud Run / Knative service name.
pub const K_SERVICE: &str = "K_SERVICE";
/// Cloud Run / Knative revision name.
pub const K_REVISION: &str = "K_REVISION";
/// Cloud Functions function name.
pub const FUNCTION_NAME: &str = "FUNCTION_NAME";
/// App Engine service name.
pub const GAE_SERVICE: &str = "GAE_SERVICE";
/// App Engine version.
pub const GAE_VERSION: &str = "GAE_VERSION";
/// Legacy App Engine module name.
pub const GAE_MODULE_NAME: &str = "GAE_MODULE_NAME";
/// Legacy App Engine module version.
pub const GAE_MODULE_VERSION: &str = "GAE_MODULE_VERSION";
/// Deployment environment flag; `production` permits reporting in
/// production mode.
pub const APP_ENV: &str = "APP_ENV";
/// Log level override (0-5).
pub const GCLOUD_ERRORS_LOGLEVEL: &str = "GCLOUD_ERRORS_LOGLEVEL";
/// Project id.
pub const GCLOUD_PROJECT: &str = "GCLOUD_PROJECT";
/// Project id, newer spelling.
pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
/// Path to a credentials JSON file.
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Host (and optional port) of the metadata server.
pub const GCE_METADATA_HOST: &str = "GCE_METADATA_HOST";

/// Source of environment variables.
pub trait Environment: Send + Sync + fmt::Debug {
    /// Returns the value of `key`, or `None` when unset or not valid unicode.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns the value of `key` when it is set to a non-empty string.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|value| !value.is_empty())
    }
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl ProcessEnvironment {
    /// Creates a shared handle to the process environment.
    pub fn shared() -> Arc<dyn Environment> {
        Arc::new(Self)
    }
}

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, used by tests and embedders that resolve
/// configuration for another process.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    vars: HashMap<String, String>,
}

impl StaticEnvironment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Wraps this environment for sharing with a configuration.
    pub fn shared(self) -> Arc<dyn Environment> {
        Arc::new(self)
    }
}

impl<K, V> FromIterator<(K, V)> for StaticEnvironment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl Environment for StaticEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}
