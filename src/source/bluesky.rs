//! Bluesky (AT Protocol) source implementation.
//!
//! Talks to the XRPC API with [`reqwest`]: one session login at startup, list
//! member resolution with cursor pagination, and per-author feed queries.
//! Every request shares one rate limiter, and connection errors, 429s and
//! 5xx responses are retried with backoff. Response decoding is split into
//! pure functions so tests can exercise it without a server.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Item, Media, PostSource, SourceList};
use crate::config::{BlueskyConfig, Secret};
use crate::error::FetchError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

const LIST_PAGE_SIZE: u32 = 100;
const FEED_PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone)]
struct Session {
    access_jwt: String,
    did: String,
}

/// An authenticated Bluesky XRPC client.
pub struct BlueskyClient {
    client: reqwest::Client,
    service_url: String,
    username: String,
    password: Secret,
    session: RwLock<Option<Session>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl BlueskyClient {
    pub fn new(config: &BlueskyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            service_url: config.service_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            session: RwLock::new(None),
            limiter: RateLimiter::new(config.requests.max_per_window, config.requests.window),
            retry: RetryPolicy::from(&config.requests),
        }
    }

    /// Create a session. Returns the handle the server knows us by.
    pub async fn login(&self) -> Result<String, FetchError> {
        let endpoint = "com.atproto.server.createSession";
        let session = self
            .with_retry(endpoint, move || self.create_session(endpoint))
            .await?;
        info!(handle = %session.handle, did = %session.did, "Logged in to Bluesky");

        *self.session.write().await = Some(Session {
            access_jwt: session.access_jwt,
            did: session.did,
        });
        Ok(session.handle)
    }

    /// Resolve every member of a list, following the cursor to the end.
    pub async fn list_members(&self, list_uri: &str) -> Result<SourceList, FetchError> {
        let endpoint = "app.bsky.graph.getList";
        let mut handles = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let limit = LIST_PAGE_SIZE.to_string();
            let mut query = vec![("list", list_uri), ("limit", limit.as_str())];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }

            let page: ListResponse = self.get_json(endpoint, &query).await?;
            let count = page.items.len();
            handles.extend(page.items.into_iter().map(|entry| entry.subject.handle));
            debug!(count, "Fetched list page");

            match page.cursor {
                Some(next) if count > 0 => cursor = Some(next),
                _ => break,
            }
        }

        let members = SourceList::new(handles);
        if members.is_empty() {
            warn!(list = %list_uri, "No members found in list");
        } else {
            info!(count = members.len(), "Found list members");
        }
        Ok(members)
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, nsid)
    }

    /// Run `call` until it succeeds, fails for good, or runs out of attempts.
    async fn with_retry<T, F, Fut>(&self, endpoint: &str, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt, None);
                    warn!(
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Bluesky request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn create_session(&self, endpoint: &str) -> Result<CreateSessionResponse, FetchError> {
        let body = CreateSessionRequest {
            identifier: &self.username,
            password: self.password.expose(),
        };
        self.limiter.acquire().await;
        let resp = self
            .client
            .post(self.xrpc_url(endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| network(endpoint, e))?;
        decode(endpoint, resp).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.with_retry(endpoint, move || self.get_json_once(endpoint, query))
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let mut relogged = false;
        loop {
            let token = self
                .session
                .read()
                .await
                .as_ref()
                .map(|s| s.access_jwt.clone())
                .ok_or(FetchError::NotAuthenticated)?;

            self.limiter.acquire().await;
            let resp = self
                .client
                .get(self.xrpc_url(endpoint))
                .bearer_auth(&token)
                .query(query)
                .send()
                .await
                .map_err(|e| network(endpoint, e))?;

            let status = resp.status();
            if !matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
                return decode(endpoint, resp).await;
            }

            // Access tokens are short-lived; log in again once and retry.
            let body = resp.text().await.unwrap_or_default();
            let expired = body.contains("ExpiredToken") || body.contains("InvalidToken");
            if expired && !relogged {
                debug!(endpoint, "Session expired, logging in again");
                self.login().await?;
                relogged = true;
                continue;
            }
            return Err(FetchError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }
    }
}

#[async_trait]
impl PostSource for BlueskyClient {
    fn name(&self) -> &str {
        "bluesky"
    }

    async fn fetch(&self, author: &str) -> Result<Vec<Item>, FetchError> {
        let limit = FEED_PAGE_SIZE.to_string();
        let feed: AuthorFeedResponse = self
            .get_json(
                "app.bsky.feed.getAuthorFeed",
                &[("actor", author), ("limit", limit.as_str())],
            )
            .await?;
        Ok(parse_feed(feed))
    }

    async fn health_check(&self) -> Result<(), FetchError> {
        let actor = match self.session.read().await.as_ref() {
            Some(s) => s.did.clone(),
            None => return Err(FetchError::NotAuthenticated),
        };
        let profile: ProfileResponse = self
            .get_json("app.bsky.actor.getProfile", &[("actor", actor.as_str())])
            .await?;
        debug!(handle = %profile.handle, "Bluesky connection healthy");
        Ok(())
    }
}

impl std::fmt::Debug for BlueskyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueskyClient")
            .field("service_url", &self.service_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn network(endpoint: &str, err: reqwest::Error) -> FetchError {
    FetchError::Network {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<T, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(FetchError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    resp.json().await.map_err(|e| FetchError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    access_jwt: String,
    did: String,
    handle: String,
}

#[derive(Deserialize)]
struct ListResponse {
    cursor: Option<String>,
    #[serde(default)]
    items: Vec<ListItem>,
}

#[derive(Deserialize)]
struct ListItem {
    subject: ProfileView,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    did: String,
    handle: String,
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ProfileResponse {
    handle: String,
}

#[derive(Deserialize)]
pub(crate) struct AuthorFeedResponse {
    #[serde(default)]
    feed: Vec<FeedViewPost>,
}

#[derive(Deserialize)]
struct FeedViewPost {
    post: PostView,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: String,
    author: ProfileView,
    record: PostRecord,
    indexed_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    /// Decoded separately so one odd embed cannot fail the whole feed.
    embed: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(tag = "$type")]
enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<EmbedImage> },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { media: Box<Embed> },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct EmbedImage {
    image: Option<BlobRef>,
}

/// Current blobs carry `ref.$link`; records from before the blob type
/// existed carry a bare `cid`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BlobRef {
    Typed {
        #[serde(rename = "ref")]
        link: CidLink,
    },
    Legacy {
        cid: String,
    },
}

impl BlobRef {
    fn cid(&self) -> &str {
        match self {
            BlobRef::Typed { link } => &link.cid,
            BlobRef::Legacy { cid } => cid,
        }
    }
}

#[derive(Deserialize)]
struct CidLink {
    #[serde(rename = "$link")]
    cid: String,
}

impl Embed {
    fn media(&self, owner: &str) -> Vec<Media> {
        match self {
            Embed::Images { images } => images
                .iter()
                .filter_map(|img| img.image.as_ref())
                .map(|blob| Media::Blob {
                    owner: owner.to_string(),
                    cid: blob.cid().to_string(),
                })
                .collect(),
            Embed::RecordWithMedia { media } => media.media(owner),
            Embed::Other => Vec::new(),
        }
    }
}

/// Convert an author feed into [`Item`]s.
///
/// The server-side index time is preferred over the client-supplied
/// `createdAt`. Entries with no parseable timestamp are skipped with a
/// warning.
pub(crate) fn parse_feed(feed: AuthorFeedResponse) -> Vec<Item> {
    feed.feed
        .into_iter()
        .filter_map(|entry| {
            let post = entry.post;
            let created_at = post
                .indexed_at
                .as_deref()
                .or(post.record.created_at.as_deref())
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let Some(created_at) = created_at else {
                warn!(uri = %post.uri, "Skipping post without a valid timestamp");
                return None;
            };

            let rkey = post.uri.rsplit('/').next().unwrap_or_default();
            let link = format!("https://bsky.app/profile/{}/post/{}", post.author.handle, rkey);
            let media = match post.record.embed {
                Some(raw) => match serde_json::from_value::<Embed>(raw) {
                    Ok(embed) => embed.media(&post.author.did),
                    Err(e) => {
                        warn!(uri = %post.uri, error = %e, "Ignoring unreadable embed");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };

            Some(Item {
                id: post.uri,
                author: post.author.handle,
                author_display_name: post.author.display_name,
                created_at,
                text: post.record.text,
                media,
                link,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_feed() -> serde_json::Value {
        json!({
            "cursor": "abc",
            "feed": [
                {
                    "post": {
                        "uri": "at://did:plc:alice/app.bsky.feed.post/3kpost1",
                        "cid": "bafypost1",
                        "author": {
                            "did": "did:plc:alice",
                            "handle": "alice.bsky.social",
                            "displayName": "Alice"
                        },
                        "record": {
                            "$type": "app.bsky.feed.post",
                            "text": "hello world",
                            "createdAt": "2025-06-01T11:59:00.000Z",
                            "embed": {
                                "$type": "app.bsky.embed.images",
                                "images": [
                                    {"alt": "", "image": {"$type": "blob", "ref": {"$link": "bafkimg1"}, "mimeType": "image/jpeg", "size": 1}},
                                    {"alt": "", "image": {"$type": "blob", "ref": {"$link": "bafkimg2"}, "mimeType": "image/png", "size": 2}}
                                ]
                            }
                        },
                        "indexedAt": "2025-06-01T12:00:00.000Z"
                    }
                },
                {
                    "post": {
                        "uri": "at://did:plc:alice/app.bsky.feed.post/3kpost2",
                        "author": {"did": "did:plc:alice", "handle": "alice.bsky.social"},
                        "record": {
                            "text": "quote with media",
                            "createdAt": "2025-06-01T10:00:00Z",
                            "embed": {
                                "$type": "app.bsky.embed.recordWithMedia",
                                "record": {"$type": "app.bsky.embed.record", "record": {}},
                                "media": {
                                    "$type": "app.bsky.embed.images",
                                    "images": [{"image": {"ref": {"$link": "bafkimg3"}}}]
                                }
                            }
                        }
                    }
                },
                {
                    "post": {
                        "uri": "at://did:plc:alice/app.bsky.feed.post/3kpost3",
                        "author": {"did": "did:plc:alice", "handle": "alice.bsky.social"},
                        "record": {
                            "text": "external link card",
                            "embed": {"$type": "app.bsky.embed.external", "external": {"uri": "https://example.com"}}
                        },
                        "indexedAt": "2025-06-01T09:00:00Z"
                    }
                },
                {
                    "post": {
                        "uri": "at://did:plc:alice/app.bsky.feed.post/3kbroken",
                        "author": {"did": "did:plc:alice", "handle": "alice.bsky.social"},
                        "record": {"text": "no time"}
                    }
                }
            ]
        })
    }

    #[test]
    fn parse_feed_extracts_posts() {
        let feed: AuthorFeedResponse = serde_json::from_value(sample_feed()).unwrap();
        let items = parse_feed(feed);

        assert_eq!(items.len(), 3, "post without timestamp is skipped");

        let first = &items[0];
        assert_eq!(first.id, "at://did:plc:alice/app.bsky.feed.post/3kpost1");
        assert_eq!(first.author, "alice.bsky.social");
        assert_eq!(first.author_display_name.as_deref(), Some("Alice"));
        assert_eq!(first.text, "hello world");
        assert_eq!(
            first.link,
            "https://bsky.app/profile/alice.bsky.social/post/3kpost1"
        );
        assert_eq!(
            first.created_at,
            DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z").unwrap(),
            "indexedAt wins over createdAt"
        );
        assert_eq!(first.media.len(), 2);
        assert_eq!(
            first.media[1],
            Media::Blob {
                owner: "did:plc:alice".into(),
                cid: "bafkimg2".into()
            }
        );
    }

    #[test]
    fn parse_feed_handles_nested_and_unknown_embeds() {
        let feed: AuthorFeedResponse = serde_json::from_value(sample_feed()).unwrap();
        let items = parse_feed(feed);

        assert_eq!(items[1].media.len(), 1, "recordWithMedia images are kept");
        assert_eq!(
            items[1].created_at,
            DateTime::parse_from_rfc3339("2025-06-01T10:00:00Z").unwrap(),
            "createdAt is the fallback"
        );
        assert!(items[2].media.is_empty(), "external cards carry no media");
    }

    #[test]
    fn legacy_and_odd_embeds_do_not_sink_the_feed() {
        let feed: AuthorFeedResponse = serde_json::from_value(json!({
            "feed": [
                {
                    "post": {
                        "uri": "at://did:plc:bob/app.bsky.feed.post/3old",
                        "author": {"did": "did:plc:bob", "handle": "bob.bsky.social"},
                        "record": {
                            "text": "2023 photo",
                            "embed": {
                                "$type": "app.bsky.embed.images",
                                "images": [
                                    {"alt": "", "image": {"cid": "bafklegacy", "mimeType": "image/jpeg"}},
                                    {"alt": "no blob at all"}
                                ]
                            }
                        },
                        "indexedAt": "2023-04-01T08:00:00Z"
                    }
                },
                {
                    "post": {
                        "uri": "at://did:plc:bob/app.bsky.feed.post/3weird",
                        "author": {"did": "did:plc:bob", "handle": "bob.bsky.social"},
                        "record": {
                            "text": "mangled embed",
                            "embed": {"$type": "app.bsky.embed.images", "images": "oops"}
                        },
                        "indexedAt": "2023-04-02T08:00:00Z"
                    }
                },
                {
                    "post": {
                        "uri": "at://did:plc:bob/app.bsky.feed.post/3new",
                        "author": {"did": "did:plc:bob", "handle": "bob.bsky.social"},
                        "record": {"text": "fresh"},
                        "indexedAt": "2025-06-01T12:00:00Z"
                    }
                }
            ]
        }))
        .unwrap();

        let items = parse_feed(feed);
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0].media,
            [Media::Blob {
                owner: "did:plc:bob".into(),
                cid: "bafklegacy".into()
            }]
        );
        assert!(items[1].media.is_empty());
        assert_eq!(items[2].text, "fresh");
    }

    fn client_for(server: &MockServer) -> BlueskyClient {
        BlueskyClient::new(&BlueskyConfig {
            username: "relay.bsky.social".into(),
            password: Secret::new("app-pass"),
            list_url: String::new(),
            list_uri: "at://did:plc:owner/app.bsky.graph.list/xyz".into(),
            service_url: server.uri(),
            requests: RequestPolicy {
                max_per_window: 1000,
                window: Duration::from_secs(60),
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
            },
        })
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .and(body_json(json!({"identifier": "relay.bsky.social", "password": "app-pass"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessJwt": "jwt-1",
                "refreshJwt": "refresh-1",
                "did": "did:plc:relay",
                "handle": "relay.bsky.social"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_without_login_is_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let err = client.fetch("alice.bsky.social").await.unwrap_err();
        assert!(matches!(err, FetchError::NotAuthenticated));
    }

    #[tokio::test]
    async fn login_then_fetch_author_feed() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.getAuthorFeed"))
            .and(query_param("actor", "alice.bsky.social"))
            .and(header("authorization", "Bearer jwt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_feed()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.login().await.unwrap(), "relay.bsky.social");

        let items = client.fetch("alice.bsky.social").await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn bad_credentials_surface_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": "AuthenticationRequired"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).login().await.unwrap_err();
        assert!(matches!(err, FetchError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn list_members_follows_cursor() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.graph.getList"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"uri": "at://x/3", "subject": {"did": "did:plc:c", "handle": "carol.bsky.social"}},
                    {"uri": "at://x/4", "subject": {"did": "did:plc:a", "handle": "alice.bsky.social"}}
                ]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.graph.getList"))
            .and(query_param("list", "at://did:plc:owner/app.bsky.graph.list/xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cursor": "page2",
                "items": [
                    {"uri": "at://x/1", "subject": {"did": "did:plc:a", "handle": "alice.bsky.social"}},
                    {"uri": "at://x/2", "subject": {"did": "did:plc:b", "handle": "bob.bsky.social"}}
                ]
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login().await.unwrap();
        let members = client
            .list_members("at://did:plc:owner/app.bsky.graph.list/xyz")
            .await
            .unwrap();

        let handles: Vec<&str> = members.iter().collect();
        assert_eq!(
            handles,
            ["alice.bsky.social", "bob.bsky.social", "carol.bsky.social"]
        );
    }

    #[tokio::test]
    async fn list_lookup_survives_a_server_blip() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.graph.getList"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.graph.getList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"uri": "at://x/1", "subject": {"did": "did:plc:a", "handle": "alice.bsky.social"}}
                ]
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login().await.unwrap();
        let members = client
            .list_members("at://did:plc:owner/app.bsky.graph.list/xyz")
            .await
            .unwrap();
        assert_eq!(members.iter().collect::<Vec<_>>(), ["alice.bsky.social"]);
    }

    #[tokio::test]
    async fn feed_fetch_gives_up_after_three_server_errors() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.getAuthorFeed"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login().await.unwrap();
        let err = client.fetch("alice.bsky.social").await.unwrap_err();
        assert!(matches!(err, FetchError::Api { status: 502, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.feed.getAuthorFeed"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "InvalidRequest", "message": "Profile not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login().await.unwrap();
        let err = client.fetch("ghost.bsky.social").await.unwrap_err();
        assert!(matches!(err, FetchError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn expired_token_triggers_single_relogin() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "ExpiredToken", "message": "Token has expired"})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/app.bsky.actor.getProfile"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"handle": "relay.bsky.social"})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login().await.unwrap();
        client.health_check().await.unwrap();
    }
}
