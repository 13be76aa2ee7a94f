//! Sync status and drain pass results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide snapshot of the offline sync subsystem
///
/// Never persisted; rebuilt from a reachability probe and the queue count
/// every time the process starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    /// Held while a drain pass runs; a second pass is refused meanwhile
    pub is_syncing: bool,
    pub pending_operations: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Counters collected during one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Operations picked up from the queue
    pub attempted: u32,
    pub succeeded: u32,
    /// Replays that failed and stay pending for the next pass
    pub failed: u32,
    /// Replays that failed and will not be retried automatically
    pub dead_lettered: u32,
    /// Left pending untried because an earlier operation on the same record failed
    #[serde(default)]
    pub deferred: u32,
    /// Pending operations left after the pass
    pub remaining: u64,
    pub duration_ms: u64,
}

impl SyncReport {
    /// True when every attempted operation was replayed
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.dead_lettered == 0 && self.deferred == 0
    }

    /// One-line summary suitable for a UI toast
    pub fn summary(&self) -> String {
        if self.attempted == 0 {
            "Nothing to sync".to_string()
        } else if self.is_clean() {
            format!("{} operations synced", self.succeeded)
        } else {
            format!(
                "{} operations synced, {} pending retry, {} need attention",
                self.succeeded,
                self.failed + self.deferred,
                self.dead_lettered
            )
        }
    }
}

/// Why a drain request did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another pass holds the syncing flag
    AlreadySyncing,
    /// The remote store could not be reached
    Offline,
}

/// Result of asking the orchestrator to drain the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped { reason: SkipReason },
}

impl SyncOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped { .. } => None,
        }
    }
}
