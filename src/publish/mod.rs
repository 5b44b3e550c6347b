//! Outbound side: formatting, rate limiting and retrying sends to the
//! destination platform.
//!
//! [`Publisher`] owns the one [`RateLimiter`] for the process and drives each
//! item through `Pending → Sending → {Delivered | Retrying → Sending | Failed}`.
//! The platform itself sits behind the [`Destination`] trait; [`discord`] is
//! the only implementation.

mod discord;
mod format;

pub use discord::DiscordClient;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RequestPolicy;
use crate::error::PublishError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::source::Item;

/// Id the destination assigned to a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A messaging platform that can receive relayed posts.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    /// One delivery attempt. Implementations classify failures as transient
    /// or permanent; retrying is the publisher's job.
    async fn send(&self, item: &Item) -> Result<MessageId, PublishError>;

    async fn health_check(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Lifecycle of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Pending,
    Sending { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Delivered,
    Failed,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Sending { attempt } => write!(f, "sending (attempt {attempt})"),
            Self::Retrying { attempt, delay } => {
                write!(f, "retrying in {}ms after attempt {attempt}", delay.as_millis())
            }
            Self::Delivered => f.write_str("delivered"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

pub struct Publisher {
    destination: Arc<dyn Destination>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(destination: Arc<dyn Destination>, config: &RequestPolicy) -> Self {
        Self {
            destination,
            limiter: RateLimiter::new(config.max_per_window, config.window),
            retry: RetryPolicy::from(config),
        }
    }

    pub fn destination(&self) -> &dyn Destination {
        self.destination.as_ref()
    }

    /// Deliver one item, retrying transient failures with backoff.
    ///
    /// Every attempt, retries included, goes through the shared rate limiter.
    /// Any non-transient error ([`PublishError::Permanent`] or
    /// [`PublishError::Refused`]) is returned straight away;
    /// [`PublishError::Exhausted`] comes back once `max_attempts` transient
    /// failures have happened.
    pub async fn publish(&self, item: &Item) -> Result<MessageId, PublishError> {
        let mut state = PublishState::Pending;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.acquire().await;
            transition(item, &mut state, PublishState::Sending { attempt });

            let err = match self.destination.send(item).await {
                Ok(id) => {
                    transition(item, &mut state, PublishState::Delivered);
                    return Ok(id);
                }
                Err(err) => err,
            };

            let retry_after = match &err {
                PublishError::Transient { retry_after, .. } => *retry_after,
                _ => {
                    transition(item, &mut state, PublishState::Failed);
                    return Err(err);
                }
            };

            if attempt >= self.retry.max_attempts {
                transition(item, &mut state, PublishState::Failed);
                return Err(PublishError::Exhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            let delay = self.retry.delay(attempt, retry_after);
            warn!(
                item = %item.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Publish failed, retrying"
            );
            transition(item, &mut state, PublishState::Retrying { attempt, delay });
            tokio::time::sleep(delay).await;
        }
    }
}

fn transition(item: &Item, state: &mut PublishState, next: PublishState) {
    debug_assert!(!state.is_terminal(), "no transition out of {state}");
    debug!(item = %item.id, from = %state, to = %next, "Publish state");
    *state = next;
}
