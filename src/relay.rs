//! The relay loop.
//!
//! One cycle is poll → filter → dedupe → publish, run to completion before
//! the next tick is taken, so two cycles never overlap and the same post is
//! never in flight twice. History is owned by the caller and lent to each
//! cycle; the relay saves it every time an item is recorded and once more on
//! the way out, so a hard kill mid-cycle loses nothing already delivered.
//!
//! ## Failed publishes
//!
//! An item the destination rejected outright is recorded as seen, so a bad
//! post cannot wedge every future cycle. An item that only ran out of
//! transient retries is left unseen and tried again next cycle; the age
//! filter eventually retires it. When the destination refuses the channel
//! itself (bad token, lost permission, deleted channel) the item stays
//! unseen and the relay stops, since every later item would fail the same
//! way.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{Error, PublishError};
use crate::filter::is_fresh;
use crate::history::History;
use crate::poll::Poller;
use crate::publish::Publisher;
use crate::source::SourceList;

/// Tallies for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub stale: usize,
    pub duplicate: usize,
    pub delivered: usize,
    /// Transient failures left for a later cycle.
    pub failed: usize,
    /// Permanent failures recorded as seen.
    pub skipped: usize,
    pub source_failures: usize,
    /// Shutdown arrived before every item was published.
    pub aborted: bool,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub max_age: chrono::Duration,
    pub health_interval: Duration,
    pub history_path: PathBuf,
}

pub struct Relay {
    poller: Poller,
    publisher: Publisher,
    sources: SourceList,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        poller: Poller,
        publisher: Publisher,
        sources: SourceList,
        settings: RelaySettings,
    ) -> Self {
        Self {
            poller,
            publisher,
            sources,
            settings,
        }
    }

    /// Run one cycle against `history`, using `now` for the age filter.
    ///
    /// Checks `shutdown` before every publish and stops early once it is set.
    /// Fails with [`Error::Fetch`] when nothing could be fetched, and with
    /// [`Error::Publish`] when the destination refuses the channel.
    pub async fn run_cycle(
        &self,
        history: &mut History,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, Error> {
        let outcome = self.poller.fetch_recent(&self.sources).await?;
        for failure in &outcome.failures {
            warn!(
                source = self.poller.source().name(),
                author = %failure.author,
                error = %failure.error,
                "Fetch failed, continuing with other sources"
            );
        }
        let mut report = CycleReport {
            fetched: outcome.items.len(),
            source_failures: outcome.failures.len(),
            ..Default::default()
        };

        for item in &outcome.items {
            if !is_fresh(item, self.settings.max_age, now) {
                report.stale += 1;
                continue;
            }
            if history.seen(&item.id) {
                report.duplicate += 1;
                continue;
            }
            if *shutdown.borrow() {
                info!("Shutdown requested, leaving remaining items for next run");
                report.aborted = true;
                break;
            }

            info!(item = %item.id, author = %item.author, created_at = %item.created_at, "New post");
            match self.publisher.publish(item).await {
                Ok(message_id) => {
                    history.record(&item.id);
                    self.persist(history);
                    report.delivered += 1;
                    debug!(item = %item.id, %message_id, "Relayed post");
                }
                Err(e @ PublishError::Refused { .. }) => {
                    error!(
                        item = %item.id,
                        author = %item.author,
                        created_at = %item.created_at,
                        destination = self.publisher.destination().name(),
                        error = %e,
                        "Destination refused the channel, leaving post unseen"
                    );
                    return Err(e.into());
                }
                Err(e) if e.is_irrecoverable() => {
                    history.record(&item.id);
                    self.persist(history);
                    report.skipped += 1;
                    error!(
                        item = %item.id,
                        author = %item.author,
                        created_at = %item.created_at,
                        destination = self.publisher.destination().name(),
                        error = %e,
                        "Destination rejected post, marking as seen"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        item = %item.id,
                        author = %item.author,
                        created_at = %item.created_at,
                        destination = self.publisher.destination().name(),
                        error = %e,
                        "Could not relay post, will retry next cycle"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Verify both platforms still accept our credentials.
    pub async fn check_health(&self) -> Result<(), Error> {
        self.poller
            .source()
            .health_check()
            .await
            .map_err(|e| Error::Unhealthy(format!("{}: {e}", self.poller.source().name())))?;
        self.publisher
            .destination()
            .health_check()
            .await
            .map_err(|e| Error::Unhealthy(format!("{}: {e}", self.publisher.destination().name())))?;
        debug!("Health check passed");
        Ok(())
    }

    /// Loop until `shutdown` flips to `true` (or its sender goes away), or a
    /// health check fails. History is saved before returning either way.
    pub async fn run(
        &self,
        history: &mut History,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Error> {
        info!(
            sources = self.sources.len(),
            interval_secs = self.settings.poll_interval.as_secs(),
            max_age_minutes = self.settings.max_age.num_minutes(),
            "Relay started"
        );

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health = interval_at(
            Instant::now() + self.settings.health_interval,
            self.settings.health_interval,
        );
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                _ = health.tick() => {
                    if let Err(e) = self.check_health().await {
                        error!(error = %e, "Health check failed, stopping");
                        break Err(e);
                    }
                }
                _ = poll.tick() => {
                    match self.run_cycle(history, Utc::now(), &shutdown).await {
                        Ok(report) => {
                            info!(
                                fetched = report.fetched,
                                stale = report.stale,
                                duplicate = report.duplicate,
                                delivered = report.delivered,
                                failed = report.failed,
                                skipped = report.skipped,
                                source_failures = report.source_failures,
                                aborted = report.aborted,
                                "Cycle complete"
                            );
                        }
                        Err(Error::Fetch(e)) => warn!(error = %e, "Cycle produced nothing"),
                        Err(e) => {
                            error!(error = %e, "Relay cannot deliver, stopping");
                            break Err(e);
                        }
                    }
                }
            }
        };

        self.persist(history);
        info!("Relay stopped");
        result
    }

    fn persist(&self, history: &History) {
        if let Err(e) = history.save(&self.settings.history_path) {
            error!(error = %e, "Failed to save history");
        }
    }
}
