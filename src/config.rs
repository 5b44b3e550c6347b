//! Runtime configuration.
//!
//! Everything comes from the environment (a `.env` file is loaded first by
//! `main`) and is validated once into an immutable [`Config`]. Parsing goes
//! through a lookup function so tests never touch the real process
//! environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::logging::{LogFormat, LoggingConfig};

const DEFAULT_MAX_HISTORY: usize = 1000;
const DEFAULT_HISTORY_FILE: &str = "data/history.json";
const DEFAULT_HEALTH_CHECK_MINUTES: u64 = 30;
/// Upper bound for every minutes setting: one leap year.
const MAX_MINUTES: u64 = 366 * 24 * 60;
const DEFAULT_BLUESKY_SERVICE: &str = "https://bsky.social";
const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct BlueskyConfig {
    pub username: String,
    pub password: Secret,
    /// The list as given, e.g. `https://bsky.app/profile/did:plc:abc/lists/xyz`.
    pub list_url: String,
    /// The same list as an AT URI, which is what the XRPC API expects.
    pub list_uri: String,
    pub service_url: String,
    pub requests: RequestPolicy,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: Secret,
    pub channel_id: u64,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub capacity: usize,
}

/// Rate limit and retry settings for one outbound API.
///
/// Not environment-driven; each platform gets its own fixed budget.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub max_per_window: usize,
    pub window: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RequestPolicy {
    /// Every XRPC call shares 30 requests a minute.
    pub fn bluesky() -> Self {
        Self {
            max_per_window: 30,
            window: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Discord allows roughly 5 messages per 5 seconds in one channel.
    pub fn discord() -> Self {
        Self {
            max_per_window: 5,
            window: Duration::from_secs(5),
            ..Self::bluesky()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub discord: DiscordConfig,
    pub history: HistoryConfig,
    pub publish: RequestPolicy,
    pub logging: LoggingConfig,
    pub poll_interval: Duration,
    pub max_age: chrono::Duration,
    pub health_interval: Duration,
    pub fetch_concurrency: usize,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let list_url = require("BSKY_LIST_URL")?;
        let list_uri = list_url_to_at_uri(&list_url)?;

        let bluesky = BlueskyConfig {
            username: require("BLUESKY_USERNAME")?,
            password: Secret::new(require("BLUESKY_PASSWORD")?),
            list_url,
            list_uri,
            service_url: get("BLUESKY_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_BLUESKY_SERVICE.to_string()),
            requests: RequestPolicy::bluesky(),
        };

        let discord = DiscordConfig {
            token: Secret::new(require("DISCORD_TOKEN")?),
            channel_id: parse_number("DISCORD_CHANNEL_ID", &require("DISCORD_CHANNEL_ID")?)?,
            api_url: get("DISCORD_API_URL").unwrap_or_else(|| DEFAULT_DISCORD_API.to_string()),
        };

        let poll_interval = parse_minutes(
            "CHECK_INTERVAL_MINUTES",
            &require("CHECK_INTERVAL_MINUTES")?,
        )?;
        let age = parse_minutes("POST_AGE_MINUTES", &require("POST_AGE_MINUTES")?)?;
        let max_age = chrono::Duration::from_std(age).map_err(|e| ConfigError::Invalid {
            field: "POST_AGE_MINUTES",
            reason: e.to_string(),
        })?;

        let capacity = match get("MAX_HISTORY_SIZE") {
            Some(raw) => parse_positive("MAX_HISTORY_SIZE", &raw)?,
            None => DEFAULT_MAX_HISTORY,
        };
        let history = HistoryConfig {
            path: get("HISTORY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE)),
            capacity,
        };

        let health_interval = match get("HEALTH_CHECK_MINUTES") {
            Some(raw) => parse_minutes("HEALTH_CHECK_MINUTES", &raw)?,
            None => Duration::from_secs(DEFAULT_HEALTH_CHECK_MINUTES * 60),
        };

        let logging = LoggingConfig {
            level: get("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            format: match get("LOG_FORMAT") {
                Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                    field: "LOG_FORMAT",
                    reason,
                })?,
                None => LogFormat::Pretty,
            },
            debug: match get("DEBUG") {
                Some(raw) => parse_flag("DEBUG", &raw)?,
                None => false,
            },
        };

        Ok(Self {
            bluesky,
            discord,
            history,
            publish: RequestPolicy::discord(),
            logging,
            poll_interval,
            max_age,
            health_interval,
            fetch_concurrency: 4,
        })
    }
}

/// Convert a `https://bsky.app/profile/{did}/lists/{id}` web URL into
/// `at://{did}/app.bsky.graph.list/{id}`.
pub fn list_url_to_at_uri(web_url: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::ListUrl {
        url: web_url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(web_url).map_err(|e| invalid(&e.to_string()))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        ["profile", did, "lists", list_id] => Ok(format!("at://{did}/app.bsky.graph.list/{list_id}")),
        _ => Err(invalid("expected /profile/{did}/lists/{id}")),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn parse_positive<T>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let value: T = parse_number(field, raw)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".into(),
        });
    }
    Ok(value)
}

/// A whole number of minutes between 1 and [`MAX_MINUTES`].
fn parse_minutes(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let minutes: u64 = parse_positive(field, raw)?;
    if minutes > MAX_MINUTES {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{minutes} minutes exceeds the maximum of {MAX_MINUTES}"),
        });
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            field,
            reason: format!("{minutes} minutes is out of range"),
        })
}

fn parse_flag(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
