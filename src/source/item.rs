//! The post type shared by the poller, the filter and the publisher.
//!
//! `Item` is what every [`PostSource`](super::PostSource) converts its native
//! records into, so the relay cycle never needs to know which platform a post
//! came from.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// One media attachment on a post.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Media {
    /// Directly addressable URL.
    Url(String),
    /// A platform blob, addressed by its owner and content id.
    Blob { owner: String, cid: String },
}

impl Media {
    /// Public URL for this attachment. Blobs resolve to the full-size CDN
    /// rendition.
    pub fn url(&self) -> String {
        match self {
            Media::Url(url) => url.clone(),
            Media::Blob { owner, cid } => {
                format!("https://cdn.bsky.app/img/feed_fullsize/plain/{owner}/{cid}@jpeg")
            }
        }
    }
}

/// A single post, normalised from any source. Immutable once fetched.
///
/// ## Ordering
///
/// `Item` implements [`Ord`] **chronologically**: older posts sort first,
/// which is the order they are relayed in. Ties fall back to the id so the
/// order is total.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Item {
    /// Unique, stable identifier (the post's AT URI). This is what History
    /// remembers.
    pub id: String,

    /// Author handle, e.g. `alice.bsky.social`.
    pub author: String,

    pub author_display_name: Option<String>,

    pub created_at: DateTime<Utc>,

    pub text: String,

    /// Attachments in the order the author arranged them.
    pub media: Vec<Media>,

    /// Canonical web link back to the post.
    pub link: String,
}

impl Item {
    /// Display name when set, otherwise the handle.
    pub fn author_label(&self) -> &str {
        self.author_display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.author)
    }

    pub fn profile_link(&self) -> String {
        format!("https://bsky.app/profile/{}", self.author)
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Shorthand constructor shared with other modules' tests.
    pub fn make_item(id: &str, author: &str, created_at: DateTime<Utc>) -> Item {
        Item {
            id: id.to_string(),
            author: author.to_string(),
            author_display_name: None,
            created_at,
            text: format!("post {id}"),
            media: Vec::new(),
            link: format!("https://bsky.app/profile/{author}/post/{id}"),
        }
    }

    #[test]
    fn sorts_oldest_first() {
        let old = make_item("1", "a", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mid = make_item("2", "a", Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap());
        let new = make_item("3", "b", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        let mut items = vec![new, old, mid];
        items.sort();

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn same_timestamp_orders_by_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = make_item("a", "x", ts);
        let b = make_item("b", "y", ts);
        assert_eq!(a.cmp(&b), Ordering::Less);
    }

    #[test]
    fn blob_media_resolves_to_cdn_url() {
        let media = Media::Blob {
            owner: "did:plc:abc".into(),
            cid: "bafkreixyz".into(),
        };
        assert_eq!(
            media.url(),
            "https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:abc/bafkreixyz@jpeg"
        );
        assert_eq!(Media::Url("https://x/y.png".into()).url(), "https://x/y.png");
    }

    #[test]
    fn author_label_falls_back_to_handle() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut item = make_item("a", "alice.bsky.social", ts);
        assert_eq!(item.author_label(), "alice.bsky.social");

        item.author_display_name = Some("  ".into());
        assert_eq!(item.author_label(), "alice.bsky.social");

        item.author_display_name = Some("Alice".into());
        assert_eq!(item.author_label(), "Alice");
    }
}
