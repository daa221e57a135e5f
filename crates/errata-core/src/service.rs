//! Service context resolution.
//!
//! The service context names the reporting application to the aggregation
//! backend. It is detected from platform signals in this order, first match
//! wins:
//!
//! | Signal | service | version |
//! |--------|---------|---------|
//! | `K_SERVICE` | `K_SERVICE` | `K_REVISION` |
//! | `FUNCTION_NAME` | `FUNCTION_NAME` | unset |
//! | `GAE_SERVICE` | `GAE_SERVICE` | `GAE_VERSION` |
//! | `GAE_MODULE_NAME` | `GAE_MODULE_NAME` | `GAE_MODULE_VERSION` |
//! | none | `"rust"` | unset |
//!
//! Explicitly configured `service` and `version` then replace the detected
//! values one field at a time.

use serde::{Deserialize, Serialize};

use crate::env::{
    Environment, FUNCTION_NAME, GAE_MODULE_NAME, GAE_MODULE_VERSION, GAE_SERVICE, GAE_VERSION,
    K_REVISION, K_SERVICE,
};

/// Service name used when no platform signal or explicit name is present.
pub const DEFAULT_SERVICE: &str = "rust";

/// The `(service, version)` pair identifying the reporting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    /// Service name.
    pub service: String,
    /// Service version, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self { service: DEFAULT_SERVICE.to_string(), version: None }
    }
}

impl ServiceContext {
    /// Creates a service context.
    pub fn new(service: impl Into<String>, version: Option<String>) -> Self {
        Self { service: service.into(), version }
    }

    /// Detects the service context from platform signals alone.
    pub fn detect(env: &dyn Environment) -> Self {
        if let Some(service) = env.non_empty(K_SERVICE) {
            return Self { service, version: env.non_empty(K_REVISION) };
        }
        if let Some(service) = env.non_empty(FUNCTION_NAME) {
            return Self { service, version: None };
        }
        if let Some(service) = env.non_empty(GAE_SERVICE) {
            return Self { service, version: env.non_empty(GAE_VERSION) };
        }
        if let Some(service) = env.non_empty(GAE_MODULE_NAME) {
            return Self { service, version: env.non_empty(GAE_MODULE_VERSION) };
        }
        Self::default()
    }

    /// Detects the service context, then applies explicit overrides field by
    /// field.
    pub fn resolve(
        env: &dyn Environment,
        service_override: Option<String>,
        version_override: Option<String>,
    ) -> Self {
        let mut context = Self::detect(env);
        if let Some(service) = service_override {
            context.service = service;
        }
        if version_override.is_some() {
            context.version = version_override;
        }
        context
    }
}
