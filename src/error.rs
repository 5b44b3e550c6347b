//! Error taxonomy.
//!
//! Each concern gets its own `thiserror` enum so call sites can decide what is
//! fatal. [`Error`] wraps them for the few places that need a single type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration problems. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid list URL '{url}': {reason}")]
    ListUrl { url: String, reason: String },
}

/// Source-side failures.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },

    #[error("{endpoint} returned status {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("could not decode {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },

    #[error("not logged in to the source platform")]
    NotAuthenticated,

    #[error("all {count} sources failed to fetch")]
    AllSourcesFailed { count: usize },
}

impl FetchError {
    /// Connection trouble, rate limiting and server errors may clear up on
    /// their own; anything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Destination-side failures, split by whether another attempt could help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Rate-limit rejection, timeout, 5xx, dropped connection.
    #[error("transient publish failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The destination rejected the message itself.
    #[error("permanent publish failure: {message}")]
    Permanent { message: String },

    /// The destination refused the channel or our credentials. No message
    /// can get through until an operator fixes it.
    #[error("destination refused the channel: {message}")]
    Refused { message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl PublishError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused {
            message: message.into(),
        }
    }

    /// Whether the item should be recorded in History despite not being
    /// delivered. Only irrecoverable rejections qualify.
    pub fn is_irrecoverable(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Persisted History problems.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history file {path} is unreadable: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("failed to write history file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that end a relay cycle or the relay itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("health check failed: {0}")]
    Unhealthy(String),
}
