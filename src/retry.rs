//! Exponential backoff shared by the source client and the publisher.

use std::time::Duration;

use crate::config::RequestPolicy;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): `base * 2^(n-1)`,
    /// capped at `max_delay`. A server-requested delay wins when it is longer.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        match retry_after {
            Some(server) if server > backoff => server,
            _ => backoff,
        }
    }
}

impl From<&RequestPolicy> for RetryPolicy {
    fn from(policy: &RequestPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
        }
    }
}
