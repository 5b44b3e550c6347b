//! Source polling.
//!
//! Fetches every monitored author once per cycle, a few at a time, and merges
//! the results into one oldest-first batch. One author failing never costs
//! the others their posts; the cycle only fails when nothing could be
//! fetched at all.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::FetchError;
use crate::source::{Item, PostSource, SourceList};

/// An author whose fetch failed this cycle.
#[derive(Debug)]
pub struct SourceFailure {
    pub author: String,
    pub error: FetchError,
}

/// Everything one poll produced.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Oldest first, unique by id.
    pub items: Vec<Item>,
    pub failures: Vec<SourceFailure>,
}

pub struct Poller {
    source: Arc<dyn PostSource>,
    concurrency: usize,
}

impl Poller {
    pub fn new(source: Arc<dyn PostSource>, concurrency: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
        }
    }

    pub fn source(&self) -> &dyn PostSource {
        self.source.as_ref()
    }

    /// Fetch recent items for every author in `sources`.
    ///
    /// Returns [`FetchError::AllSourcesFailed`] only when the list is
    /// non-empty and every single fetch failed.
    pub async fn fetch_recent(&self, sources: &SourceList) -> Result<PollOutcome, FetchError> {
        let results: Vec<(String, Result<Vec<Item>, FetchError>)> = stream::iter(sources.iter())
            .map(|author| async move { (author.to_string(), self.source.fetch(author).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = PollOutcome::default();
        for (author, result) in results {
            match result {
                Ok(items) => {
                    debug!(source = self.source.name(), %author, count = items.len(), "Fetched posts");
                    outcome.items.extend(items);
                }
                Err(error) => outcome.failures.push(SourceFailure { author, error }),
            }
        }

        if !sources.is_empty() && outcome.failures.len() == sources.len() {
            return Err(FetchError::AllSourcesFailed {
                count: sources.len(),
            });
        }

        // A repost can put the same post in two authors' feeds.
        outcome.items.sort();
        let mut ids = HashSet::new();
        outcome.items.retain(|item| ids.insert(item.id.clone()));

        Ok(outcome)
    }
}
