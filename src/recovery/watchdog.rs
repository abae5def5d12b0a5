//! Stall detection watchdog.
//!
//! Monitors coordinator health by tracking activity timestamps and warning
//! when the control loop appears stalled (pending work but no progress).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default stall detection threshold (30 seconds).
pub const STALL_DETECTION_THRESHOLD_MS: u64 = 30_000;

/// Default watchdog check interval (10 seconds).
pub const STALL_WATCHDOG_INTERVAL_SECS: u64 = 10;

/// Stall detection watchdog for the coordinator.
///
/// Periodically checks if the coordinator is making progress. Warns when
/// there's pending work but no activity for longer than the threshold.
pub struct StallWatchdog {
    /// Shared timestamp of last coordinator activity.
    last_activity_ms: Arc<AtomicU64>,

    /// Shared count of pending work items.
    pending_work_count: Arc<AtomicU64>,

    /// Stall threshold in milliseconds.
    threshold_ms: u64,

    /// Check interval.
    interval: Duration,
}

impl StallWatchdog {
    /// Creates a new stall watchdog with default settings.
    pub fn new(last_activity_ms: Arc<AtomicU64>, pending_work_count: Arc<AtomicU64>) -> Self {
        Self {
            last_activity_ms,
            pending_work_count,
            threshold_ms: STALL_DETECTION_THRESHOLD_MS,
            interval: Duration::from_secs(STALL_WATCHDOG_INTERVAL_SECS),
        }
    }

    /// Runs the watchdog until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if shutdown.is_cancelled() {
                break;
            }

            self.check_health();
        }
    }

    /// Checks coordinator health and logs appropriate message.
    fn check_health(&self) {
        let elapsed_ms = self.elapsed_since_last_activity();
        let work_count = self.pending_work_count.load(Ordering::Relaxed);

        match (elapsed_ms > self.threshold_ms, work_count > 0) {
            (true, true) => {
                // Stalled: pending work but no progress
                warn!(
                    elapsed_ms,
                    pending_work = work_count,
                    threshold_ms = self.threshold_ms,
                    "STALL DETECTED: Coordinator has {} pending jobs but no progress for {}s",
                    work_count,
                    elapsed_ms / 1000
                );
            }
            (true, false) => {
                // Idle: no pending work
                debug!(elapsed_ms, "Stall watchdog: coordinator idle (no pending work)");
            }
            (false, _) => {
                // Healthy: recent activity
                debug!(
                    elapsed_ms,
                    pending_work = work_count,
                    "Stall watchdog: coordinator loop healthy"
                );
            }
        }
    }

    /// Returns milliseconds since last activity.
    fn elapsed_since_last_activity(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let last_ms = self.last_activity_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last_ms)
    }
}
