//! skyrelay: relays new posts from a Bluesky list to a Discord channel.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  Items   ┌───────────┐  fresh  ┌────────────┐  new  ┌─────────────┐
//! │ poll.rs  │ ───────► │ filter.rs │ ──────► │ history.rs │ ────► │  publish/   │
//! │(sources) │          │ (max age) │         │  (seen?)   │       │ (rate+retry)│
//! └──────────┘          └───────────┘         └────────────┘       └─────────────┘
//!       ▲                                            ▲                    │
//!       └──────────────── relay.rs (timer loop) ─────┴──── record ◄───────┘
//! ```
//!
//! * **`source/`**: the `PostSource` trait, the `Item` type and the Bluesky
//!   client.
//! * **`poll`**: fetches every list member concurrently, tolerating failures.
//! * **`filter`**: drops posts older than the configured age.
//! * **`history`**: bounded FIFO record of relayed ids, persisted as JSON.
//! * **`publish/`**: the `Destination` trait, the Discord client and the
//!   retrying `Publisher`.
//! * **`rate_limit`**, **`retry`**: the sliding-window limiter and backoff
//!   policy both platform clients share.
//! * **`relay`**: runs cycles on a timer, health checks, and shutdown.
//! * **`main`**: wires everything together: configuration, logging, login,
//!   signal handling and the exit code.

mod config;
mod error;
mod filter;
mod history;
mod logging;
mod poll;
mod publish;
mod rate_limit;
mod relay;
mod retry;
mod source;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use config::Config;
use history::History;
use poll::Poller;
use publish::{Destination, DiscordClient, Publisher};
use relay::{Relay, RelaySettings};
use source::BlueskyClient;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    config.logging.init();
    info!("skyrelay starting");

    match run(config).await {
        Ok(()) => {
            info!("skyrelay stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!(
        list = %config.bluesky.list_url,
        list_uri = %config.bluesky.list_uri,
        interval_minutes = config.poll_interval.as_secs() / 60,
        max_age_minutes = config.max_age.num_minutes(),
        "Configuration loaded"
    );

    // -- source: log in and resolve the list once ---------------------------
    let bluesky = Arc::new(BlueskyClient::new(&config.bluesky));
    bluesky.login().await.context("Bluesky login failed")?;
    let sources = bluesky
        .list_members(&config.bluesky.list_uri)
        .await
        .context("could not resolve list members")?;

    // -- destination: fail fast on a bad token ------------------------------
    let discord = Arc::new(DiscordClient::new(&config.discord).context("HTTP client setup")?);
    discord
        .health_check()
        .await
        .context("Discord refused the bot token or channel")?;
    info!(channel = config.discord.channel_id, "Connected to Discord");

    let mut history = History::load(&config.history.path, config.history.capacity);
    if history.is_empty() {
        info!(path = %config.history.path.display(), "Starting with an empty history");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let relay = Relay::new(
        Poller::new(bluesky, config.fetch_concurrency),
        Publisher::new(discord, &config.publish),
        sources,
        RelaySettings {
            poll_interval: config.poll_interval,
            max_age: config.max_age,
            health_interval: config.health_interval,
            history_path: config.history.path.clone(),
        },
    );

    relay.run(&mut history, shutdown_rx).await?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix (what container runtimes send).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
