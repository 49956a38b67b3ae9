//! Filter contract and the ordered collection the orchestrator runs.

use std::sync::Arc;

use async_trait::async_trait;
use fhirgate_core::RequestContext;

use crate::error::FilterError;

/// A synchronous-in-effect processing stage run against the context.
///
/// Filters mutate the context in place: they may rewrite headers, replace
/// the body, stash properties for later stages or reject the request by
/// returning an error. They never perform the outbound call; that is the
/// binding's job.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable name used in configuration, logs and fault reports.
    fn name(&self) -> &str;

    /// Run the filter against the context.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] to reject the request. The orchestrator
    /// records it as a fault; the error does not propagate further.
    async fn execute(&self, ctx: &mut RequestContext) -> Result<(), FilterError>;
}

/// Ordered, mutable collection of filters.
///
/// Execution strictly follows insertion order. Names are not unique; when
/// removing by name the first match is taken.
#[derive(Default)]
pub struct FilterCollection {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter at the end.
    pub fn add(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Insert a filter at `index`. Indexes beyond the end append.
    pub fn insert(&mut self, index: usize, filter: Arc<dyn Filter>) {
        let index = index.min(self.filters.len());
        self.filters.insert(index, filter);
    }

    /// Remove the first filter with the given name.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Filter>> {
        let index = self.position(name)?;
        Some(self.filters.remove(index))
    }

    /// Index of the first filter with the given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.filters.iter().position(|f| f.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Filter>> {
        self.filters.get(index)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Filter>> {
        self.filters.iter()
    }
}

impl FromIterator<Arc<dyn Filter>> for FilterCollection {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Filter>>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for FilterCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}
