//! Sliding-window rate limiter for outbound API calls.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Allows at most `max_calls` acquisitions in any `window`.
///
/// Callers that would exceed the budget sleep until the oldest call in the
/// window ages out.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Wait for a slot, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    calls.pop_front();
                }

                match calls.front() {
                    Some(&oldest) if calls.len() >= self.max_calls => {
                        self.window.saturating_sub(now.duration_since(oldest))
                    }
                    _ => {
                        calls.push_back(now);
                        return;
                    }
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}
