//! Sync scheduler - turns reconnects, timers and manual requests into drain passes
//!
//! The [`SyncScheduler`] owns no sync logic of its own. It waits on every
//! trigger source at once and asks the [`SyncOrchestrator`] for a pass; the
//! orchestrator's single-flight flag makes overlapping triggers harmless.
//!
//! ## Triggers
//!
//! ```text
//! connectivity watch (offline → online) ──┐
//! periodic interval ──────────────────────┤
//! weekly flush (weekday + UTC time) ──────┼──→ SyncOrchestrator::sync_pending()
//! SyncTrigger::request() ─────────────────┘
//!
//! probe interval ──→ ConnectivityMonitor::refresh()  (feeds the watch edge)
//! ```
//!
//! Every timer runs on tokio time, so tests drive the loop with a paused
//! runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clinicsync_core::config::Config;
use clinicsync_core::domain::SyncOutcome;
use clinicsync_core::ports::{Clock, SystemClock};

use crate::orchestrator::SyncOrchestrator;

// ============================================================================
// SchedulerSettings
// ============================================================================

/// Timing of the trigger sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Period of the regular drain pass
    pub interval: Duration,
    /// Period of the connectivity re-probe
    pub probe_interval: Duration,
    /// Weekly flush slot, `None` when disabled
    pub weekly_flush: Option<(Weekday, NaiveTime)>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            probe_interval: Duration::from_secs(30),
            weekly_flush: NaiveTime::from_hms_opt(23, 0, 0).map(|time| (Weekday::Sun, time)),
        }
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        let flush = &config.sync.weekly_flush;
        let weekly_flush = if flush.enabled {
            flush.weekday().zip(flush.time())
        } else {
            None
        };

        Self {
            interval: config.sync.interval(),
            probe_interval: config.connectivity.probe_interval(),
            weekly_flush,
        }
    }
}

/// Next occurrence of `weekday` at `time` UTC, strictly after `now`
pub fn next_weekly_flush(now: DateTime<Utc>, weekday: Weekday, time: NaiveTime) -> DateTime<Utc> {
    let days_ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(now.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let date = now.date_naive() + chrono::Duration::days(days_ahead);
    let candidate = Utc.from_utc_datetime(&date.and_time(time));

    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(7)
    }
}

// ============================================================================
// SyncTrigger
// ============================================================================

/// Cloneable handle for "sync now" requests
///
/// Requests coalesce: while one is waiting to be picked up, further
/// requests are dropped.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    /// Asks the scheduler for a pass; returns false if one is already waiting
    /// or the scheduler has stopped
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

// ============================================================================
// SyncScheduler
// ============================================================================

/// Drives drain passes from every trigger source
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, settings: SchedulerSettings) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            orchestrator,
            clock: Arc::new(SystemClock),
            settings,
            trigger_tx,
            trigger_rx,
        }
    }

    /// Replaces the wall clock used to place the weekly flush
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn trigger(&self) -> SyncTrigger {
        SyncTrigger {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Runs until `shutdown` is cancelled
    ///
    /// A pass already in progress when shutdown is requested finishes first.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            orchestrator,
            clock,
            settings,
            trigger_tx: _trigger_tx,
            mut trigger_rx,
        } = self;

        let connectivity = Arc::clone(orchestrator.connectivity());
        let mut online_rx = connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();

        let mut sync_timer =
            tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
        sync_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut probe_timer = tokio::time::interval_at(
            Instant::now() + settings.probe_interval,
            settings.probe_interval,
        );
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut next_flush = settings
            .weekly_flush
            .map(|(weekday, time)| next_weekly_flush(clock.now(), weekday, time));
        let weekly = tokio::time::sleep(delay_until(clock.as_ref(), next_flush));
        tokio::pin!(weekly);

        info!(
            interval_secs = settings.interval.as_secs(),
            probe_interval_secs = settings.probe_interval.as_secs(),
            next_weekly_flush = ?next_flush,
            "Sync scheduler starting"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, sync scheduler stopping");
                    break;
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity channel closed");
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    let reconnected = online && !was_online;
                    was_online = online;
                    if reconnected {
                        run_pass(&orchestrator, "reconnected").await;
                        was_online = *online_rx.borrow_and_update();
                    }
                }

                _ = sync_timer.tick() => {
                    run_pass(&orchestrator, "interval").await;
                    was_online = *online_rx.borrow_and_update();
                }

                () = &mut weekly, if next_flush.is_some() => {
                    run_pass(&orchestrator, "weekly_flush").await;
                    was_online = *online_rx.borrow_and_update();

                    // Place the next slot after the one that just fired, even
                    // if the wall clock lags behind tokio time
                    next_flush = match (settings.weekly_flush, next_flush) {
                        (Some((weekday, time)), Some(fired)) => {
                            Some(next_weekly_flush(clock.now().max(fired), weekday, time))
                        }
                        _ => None,
                    };
                    weekly.as_mut().reset(Instant::now() + delay_until(clock.as_ref(), next_flush));
                    debug!(next_weekly_flush = ?next_flush, "Weekly flush rescheduled");
                }

                Some(()) = trigger_rx.recv() => {
                    run_pass(&orchestrator, "manual").await;
                    was_online = *online_rx.borrow_and_update();
                }

                _ = probe_timer.tick() => {
                    connectivity.refresh().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

/// Tokio delay until `at`; far in the future when there is no slot
fn delay_until(clock: &dyn Clock, at: Option<DateTime<Utc>>) -> Duration {
    match at {
        Some(at) => (at - clock.now()).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(86_400 * 365),
    }
}

async fn run_pass(orchestrator: &SyncOrchestrator, trigger: &'static str) {
    match orchestrator.sync_pending().await {
        Ok(SyncOutcome::Completed(report)) => {
            if report.attempted > 0 {
                info!(trigger, summary = %report.summary(), "Drain pass finished");
            } else {
                debug!(trigger, "Drain pass found nothing to sync");
            }
        }
        Ok(SyncOutcome::Skipped { reason }) => {
            debug!(trigger, ?reason, "Drain pass skipped");
        }
        Err(e) => {
            warn!(trigger, error = %e, "Drain pass failed");
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("settings", &self.settings)
            .finish()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
