//! Credential and project-id test doubles that count their calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use errata_core::{ProjectIdLookup, ProjectLookupError};
use errata_delivery::{DeliveryError, TokenProvider};

/// Token source returning a fixed token, or failing, and counting requests.
#[derive(Debug)]
pub struct CountingTokenProvider {
    token: Option<String>,
    calls: AtomicUsize,
}

impl CountingTokenProvider {
    /// Always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()), calls: AtomicUsize::new(0) }
    }

    /// Always fails, like a machine without credentials.
    pub fn failing() -> Self {
        Self { token: None, calls: AtomicUsize::new(0) }
    }

    /// Number of tokens requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenProvider for CountingTokenProvider {
    async fn access_token(&self) -> errata_delivery::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone().ok_or_else(|| DeliveryError::auth("no credentials available"))
    }
}

/// Project-id lookup with a fixed answer.
#[derive(Debug)]
pub struct StaticProjectLookup {
    project_id: Option<String>,
    calls: AtomicUsize,
}

impl StaticProjectLookup {
    /// Always answers `project_id`.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self { project_id: Some(project_id.into()), calls: AtomicUsize::new(0) }
    }

    /// Always fails.
    pub fn unavailable() -> Self {
        Self { project_id: None, calls: AtomicUsize::new(0) }
    }

    /// Number of lookups performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProjectIdLookup for StaticProjectLookup {
    async fn lookup_project_id(&self) -> Result<String, ProjectLookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.project_id
            .clone()
            .ok_or_else(|| ProjectLookupError::new("metadata server unreachable"))
    }
}
