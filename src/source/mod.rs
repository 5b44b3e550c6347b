//! Source abstraction layer.
//!
//! This module defines the [`PostSource`] trait, the common [`Item`] type and
//! the [`SourceList`] of monitored authors. The concrete platform adapter
//! lives in [`bluesky`].
//!
//! ## Adding a new platform
//!
//! 1. Create a new file in this directory (e.g. `mastodon.rs`).
//! 2. Implement [`PostSource`] for a client struct, converting native posts
//!    into [`Item`] values.
//! 3. Construct it in `main.rs` instead of (or next to) the Bluesky client.
//!
//! The poller, filter, history and publisher are all source-agnostic.

mod bluesky;
mod item;

pub use bluesky::BlueskyClient;
pub use item::{Item, Media};

#[cfg(test)]
pub(crate) use item::tests::make_item;

use async_trait::async_trait;

use crate::error::FetchError;

/// Trait that every source platform client implements.
///
/// The poller calls [`fetch`](PostSource::fetch) once per monitored author per
/// cycle, possibly concurrently, so implementations must be `Send + Sync`.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Short platform label used in logs.
    fn name(&self) -> &str;

    /// Fetch the author's most recent posts, newest or oldest first; callers
    /// sort.
    async fn fetch(&self, author: &str) -> Result<Vec<Item>, FetchError>;

    /// Cheap authenticated call proving the session is still usable.
    async fn health_check(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Ordered set of author identifiers to monitor.
///
/// Built once at startup; there is deliberately no way to mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceList {
    authors: Vec<String>,
}

impl SourceList {
    /// Keep the first occurrence of every author, preserving order. Blank
    /// entries are dropped.
    pub fn new<I, S>(authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for author in authors {
            let author = author.into();
            if !author.trim().is_empty() && !unique.contains(&author) {
                unique.push(author);
            }
        }
        Self { authors: unique }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.authors.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }
}
