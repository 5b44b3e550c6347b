//! Discord destination: posts embeds to one channel through the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::format::{format_embed, Embed};
use super::{Destination, MessageId};
use crate::config::{DiscordConfig, Secret};
use crate::error::PublishError;
use crate::source::Item;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DiscordClient {
    client: reqwest::Client,
    api_url: String,
    channel_id: u64,
    token: Secret,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a Embed; 1],
}

#[derive(Deserialize)]
struct MessageResponse {
    id: String,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            channel_id: config.channel_id,
            token: config.token.clone(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token.expose())
    }
}

#[async_trait]
impl Destination for DiscordClient {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, item: &Item) -> Result<MessageId, PublishError> {
        let embed = format_embed(item);
        let url = format!("{}/channels/{}/messages", self.api_url, self.channel_id);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&CreateMessage { embeds: [&embed] })
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            // The message exists at this point; a retry would post it twice.
            let body: MessageResponse = resp.json().await.map_err(|e| {
                PublishError::permanent(format!("delivered but response unreadable: {e}"))
            })?;
            debug!(message_id = %body.id, channel = self.channel_id, "Discord accepted message");
            return Ok(MessageId(body.id));
        }

        let retry_after = header_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }

    async fn health_check(&self) -> Result<(), PublishError> {
        let resp = self
            .client
            .get(format!("{}/channels/{}", self.api_url, self.channel_id))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = header_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }
}

fn classify_transport(err: reqwest::Error) -> PublishError {
    if err.is_builder() {
        PublishError::permanent(err.to_string())
    } else {
        PublishError::transient(err.to_string())
    }
}

fn header_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Only 400 and 413 are about the message itself. 401, 403 and 404 mean
/// the token or channel is unusable for every message. Everything else may
/// clear up with time.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> PublishError {
    let message = format!("status {}: {}", status.as_u16(), body.trim());

    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
            PublishError::Permanent { message }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            PublishError::refused(message)
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let from_body = serde_json::from_str::<RateLimitBody>(body)
                .ok()
                .and_then(|b| b.retry_after)
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            PublishError::Transient {
                message,
                retry_after: from_body.or(retry_after),
            }
        }
        _ => PublishError::Transient {
            message,
            retry_after,
        },
    }
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_url", &self.api_url)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::make_item;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DiscordClient {
        DiscordClient::new(&DiscordConfig {
            token: Secret::new("bot-token"),
            channel_id: 42,
            api_url: server.uri(),
        })
        .unwrap()
    }

    fn item() -> Item {
        make_item(
            "at://did:plc:a/app.bsky.feed.post/3k1",
            "alice.bsky.social",
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn send_posts_embed_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .and(header("authorization", "Bot bot-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1111"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server).send(&item()).await.unwrap();
        assert_eq!(id, MessageId("1111".into()));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["embeds"][0]["url"], item().link.as_str());
        assert_eq!(body["embeds"][0]["author"]["name"], "alice.bsky.social");
    }

    #[tokio::test]
    async fn rate_limit_is_transient_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 1.5, "global": false})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).send(&item()).await.unwrap_err();
        match err {
            PublishError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_millis(1500)));
            }
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transient_and_bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": 50035, "message": "Invalid Form Body"})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.send(&item()).await.unwrap_err(),
            PublishError::Transient { .. }
        ));
        assert!(client.send(&item()).await.unwrap_err().is_irrecoverable());
    }

    #[tokio::test]
    async fn health_check_reads_the_target_channel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/42"))
            .and(header("authorization", "Bot bot-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "type": 0})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).health_check().await.unwrap();
    }

    #[tokio::test]
    async fn lost_channel_access_fails_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/42"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"code": 50001, "message": "Missing Access"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).health_check().await.unwrap_err();
        assert!(matches!(err, PublishError::Refused { .. }));
    }

    #[tokio::test]
    async fn forbidden_send_is_refused_not_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"code": 50013, "message": "Missing Permissions"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).send(&item()).await.unwrap_err();
        assert!(matches!(err, PublishError::Refused { .. }));
        assert!(!err.is_irrecoverable());
    }

    #[test]
    fn classify_uses_header_when_body_has_no_hint() {
        let err = classify_status(
            StatusCode::SERVICE_UNAVAILABLE,
            Some(Duration::from_secs(3)),
            "",
        );
        assert_eq!(
            err,
            PublishError::Transient {
                message: "status 503: ".into(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
    }

    #[test]
    fn only_message_level_statuses_are_permanent() {
        assert!(classify_status(StatusCode::PAYLOAD_TOO_LARGE, None, "").is_irrecoverable());
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert!(matches!(
                classify_status(status, None, ""),
                PublishError::Refused { .. }
            ));
        }
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, None, ""),
            PublishError::Transient { .. }
        ));
    }
}
