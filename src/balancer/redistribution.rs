//! Periodic load-redistribution check.
//!
//! Counts overloaded versus underloaded workers and reports a scale
//! recommendation. The cluster manager decides whether to act; this module
//! never changes worker count.

use super::snapshot::WorkerSnapshot;
use crate::cluster::WorkerStatus;
use std::time::{Duration, Instant};
use tracing::debug;

/// A job running longer than this marks its worker overloaded.
pub const OVERLOAD_JOB_RUNTIME: Duration = Duration::from_secs(120);

/// Average processing time beyond this marks a worker overloaded.
pub const OVERLOAD_AVG_PROCESSING: Duration = Duration::from_secs(60);

/// Errors within this window count as recent.
pub const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(300);

/// Idle time beyond this marks a worker underloaded.
pub const UNDERLOAD_IDLE_TIME: Duration = Duration::from_secs(300);

/// Completed-job count below which a long-idle worker counts underloaded.
pub const UNDERLOAD_MAX_COMPLETED: u64 = 5;

/// Scaling recommendation for the cluster manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleRecommendation {
    /// More workers would help: overload dominates.
    ScaleUp,
    /// Fewer workers would do: underload dominates.
    ScaleDown,
    /// Load is balanced.
    Maintain,
}

impl std::fmt::Display for ScaleRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScaleUp => write!(f, "scale-up"),
            Self::ScaleDown => write!(f, "scale-down"),
            Self::Maintain => write!(f, "maintain"),
        }
    }
}

fn is_overloaded(snapshot: &WorkerSnapshot, now: Instant) -> bool {
    let long_running = snapshot
        .busy_since
        .map(|since| now.duration_since(since) > OVERLOAD_JOB_RUNTIME)
        .unwrap_or(false);
    let slow = snapshot.avg_processing_ms > OVERLOAD_AVG_PROCESSING.as_millis() as u64;
    long_running || slow || snapshot.errored_within(RECENT_ERROR_WINDOW, now)
}

fn is_underloaded(snapshot: &WorkerSnapshot, now: Instant) -> bool {
    snapshot.status == WorkerStatus::Idle
        && snapshot
            .idle_since
            .map(|since| now.duration_since(since) > UNDERLOAD_IDLE_TIME)
            .unwrap_or(false)
        && snapshot.completed < UNDERLOAD_MAX_COMPLETED
}

/// Evaluates worker load and returns a scale recommendation.
pub fn evaluate_load(snapshots: &[WorkerSnapshot], now: Instant) -> ScaleRecommendation {
    let overloaded = snapshots.iter().filter(|s| is_overloaded(s, now)).count();
    let underloaded = snapshots.iter().filter(|s| is_underloaded(s, now)).count();

    debug!(
        workers = snapshots.len(),
        overloaded, underloaded, "Load redistribution check"
    );

    if overloaded > underloaded && overloaded > 0 {
        ScaleRecommendation::ScaleUp
    } else if underloaded > overloaded && underloaded > 0 {
        ScaleRecommendation::ScaleDown
    } else {
        ScaleRecommendation::Maintain
    }
}
