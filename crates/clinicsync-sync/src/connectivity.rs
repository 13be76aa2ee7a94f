//! Connectivity monitor
//!
//! Tracks whether the remote store is reachable. Host network events are
//! only hints: every event is verified with an active probe against the
//! remote store, and the probe result is what the monitor reports.
//! An event only moves the next probe forward; the last one is kept for
//! diagnostics ([`ConnectivityMonitor::last_event`]) and never decides the
//! state. `clinicsyncd` has no host event source and relies on the probe
//! tick; an embedding application forwards its own network-change callback
//! to [`ConnectivityMonitor::report_event`].
//!
//! ## State rule
//!
//! ```text
//! host event ──→ record hint ──→ probe (with retries) ──→ apply(probe result)
//!                                                           │
//!                                      changed? ── yes ──→ watch channel + listeners
//! ```
//!
//! A failed probe is retried before the monitor reports offline, so one
//! dropped request does not flip the state. Listeners and the watch channel
//! see transitions only, never repeated values.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use clinicsync_core::config::ConnectivityConfig;
use clinicsync_core::ports::IRemoteStore;

use crate::observer::{ListenerId, Listeners};

/// Probe retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySettings {
    /// Extra attempts after a failed probe
    pub probe_retries: u32,
    pub probe_retry_delay: Duration,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            probe_retries: 1,
            probe_retry_delay: Duration::from_millis(500),
        }
    }
}

impl From<&ConnectivityConfig> for ConnectivitySettings {
    fn from(config: &ConnectivityConfig) -> Self {
        Self {
            probe_retries: config.probe_retries,
            probe_retry_delay: config.probe_retry_delay(),
        }
    }
}

/// Online/offline state of the remote store
pub struct ConnectivityMonitor {
    remote: Arc<dyn IRemoteStore>,
    settings: ConnectivitySettings,
    state: watch::Sender<bool>,
    /// Last state reported by the host runtime, if any
    last_event: Mutex<Option<bool>>,
    listeners: Listeners<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts offline until the first probe
    pub fn new(remote: Arc<dyn IRemoteStore>, settings: ConnectivitySettings) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            remote,
            settings,
            state,
            last_event: Mutex::new(None),
            listeners: Listeners::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Registers a callback fired with the new state on every transition
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Last state reported through [`report_event`](Self::report_event)
    ///
    /// Informational only; [`is_online`](Self::is_online) is the probed state.
    pub fn last_event(&self) -> Option<bool> {
        *self
            .last_event
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Actively checks whether the remote store answers
    ///
    /// Retries a failed probe `probe_retries` times. A response carrying an
    /// application error (bad key, missing table) still proves the store is
    /// reachable and counts as online.
    pub async fn probe(&self) -> bool {
        let attempts = self.settings.probe_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self.remote.probe().await {
                Ok(()) => return true,
                Err(err) if !err.is_connectivity() => {
                    warn!(error = %err, "Probe reached the remote store but was rejected");
                    return true;
                }
                Err(err) => {
                    debug!(attempt, attempts, error = %err, "Probe failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.probe_retry_delay).await;
                    }
                }
            }
        }

        false
    }

    /// Probes and applies the result; returns the new state
    pub async fn refresh(&self) -> bool {
        let online = self.probe().await;
        self.apply(online);
        online
    }

    /// Records a network change reported by the host and verifies it
    ///
    /// The probe decides the resulting state; the event only causes the
    /// check to happen now instead of on the next probe tick.
    pub async fn report_event(&self, online: bool) -> bool {
        *self
            .last_event
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(online);

        let probed = self.probe().await;
        if probed != online {
            info!(
                reported = online,
                probed, "Host network event disagrees with probe, keeping probe result"
            );
        }
        self.apply(probed);
        probed
    }

    /// Stores `online`; notifies only when the value changes
    fn apply(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                info!("Remote store reachable, now online");
            } else {
                warn!("Remote store unreachable, now offline");
            }
            self.listeners.notify(&online);
        }
        changed
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("settings", &self.settings)
            .finish()
    }
}
