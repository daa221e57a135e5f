//! Lazily resolved, write-once project id.

use std::fmt;

use tokio::sync::OnceCell;

use crate::error::ProjectLookupError;

/// Remote source of a project id, such as a metadata server or a credentials
/// file.
#[async_trait::async_trait]
pub trait ProjectIdLookup: Send + Sync + fmt::Debug {
    /// Looks up the project id.
    async fn lookup_project_id(&self) -> Result<String, ProjectLookupError>;
}

/// Memoized project id.
///
/// A locally configured id is stored at construction. Otherwise the first
/// successful remote lookup is stored and every later call returns it
/// without another lookup. Concurrent first lookups are coalesced into one;
/// a failed lookup stores nothing, so the next call tries again.
#[derive(Debug, Default)]
pub struct ProjectIdCache {
    cell: OnceCell<String>,
}

impl ProjectIdCache {
    /// Creates a cache, pre-populated when a local id is known.
    pub fn new(local: Option<String>) -> Self {
        Self { cell: OnceCell::new_with(local) }
    }

    /// Returns the cached id without performing a lookup.
    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }

    /// Returns the cached id, looking it up through `lookup` on first use.
    ///
    /// # Errors
    ///
    /// Returns the lookup's error when nothing is cached and the lookup fails.
    pub async fn resolve(&self, lookup: &dyn ProjectIdLookup) -> Result<&str, ProjectLookupError> {
        let id = self
            .cell
            .get_or_try_init(|| async {
                let id = lookup.lookup_project_id().await?;
                if id.is_empty() {
                    return Err(ProjectLookupError::new("lookup returned an empty project id"));
                }
                tracing::debug!(project_id = %id, "project id resolved remotely");
                Ok(id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, Default)]
    struct CountingLookup {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl ProjectIdLookup for CountingLookup {
        async fn lookup_project_id(&self) -> Result<String, ProjectLookupError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && call == 0 {
                return Err(ProjectLookupError::new("metadata server unavailable"));
            }
            Ok("remote-project".to_string())
        }
    }

    #[tokio::test]
    async fn local_id_never_triggers_lookup() {
        let cache = ProjectIdCache::new(Some("local".to_string()));
        let lookup = CountingLookup::default();

        assert_eq!(cache.resolve(&lookup).await.unwrap(), "local");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_id_is_memoized() {
        let cache = ProjectIdCache::new(None);
        let lookup = CountingLookup::default();

        assert_eq!(cache.get(), None);
        assert_eq!(cache.resolve(&lookup).await.unwrap(), "remote-project");
        assert_eq!(cache.resolve(&lookup).await.unwrap(), "remote-project");
        assert_eq!(cache.get(), Some("remote-project"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_is_retried_on_next_call() {
        let cache = ProjectIdCache::new(None);
        let lookup = CountingLookup { fail_first: true, ..Default::default() };

        assert!(cache.resolve(&lookup).await.is_err());
        assert_eq!(cache.get(), None);
        assert_eq!(cache.resolve(&lookup).await.unwrap(), "remote-project");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_first_lookups_coalesce() {
        let cache = Arc::new(ProjectIdCache::new(None));
        let lookup = Arc::new(CountingLookup::default());

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let lookup = lookup.clone();
            tokio::spawn(async move {
                cache.resolve(lookup.as_ref()).await.map(str::to_string)
            })
        });

        for task in tasks.collect::<Vec<_>>() {
            assert_eq!(task.await.unwrap().unwrap(), "remote-project");
        }
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }
}
