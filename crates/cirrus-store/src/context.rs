//! Shared context handed to every collection and indexing job.

use std::sync::Arc;

use crate::index::RetryPolicy;
use crate::metadata::MetadataStore;

/// Store handle and policies shared by the jobs of one run.
///
/// Built once per run and cloned into each job; cloning is cheap.
#[derive(Clone)]
pub struct StoreContext {
    /// The metadata store all jobs write to.
    pub store: Arc<dyn MetadataStore>,
    /// Retry bound for index compare-and-swap loops.
    pub index_retry: RetryPolicy,
}

impl StoreContext {
    /// Creates a context with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            index_retry: RetryPolicy::default(),
        }
    }

    /// Overrides the index retry policy.
    #[must_use]
    pub fn with_index_retry(mut self, policy: RetryPolicy) -> Self {
        self.index_retry = policy;
        self
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("partition", &self.store.partition())
            .field("index_retry", &self.index_retry)
            .finish()
    }
}
