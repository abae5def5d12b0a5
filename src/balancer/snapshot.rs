//! Immutable worker metrics snapshot.

use crate::cluster::{WorkerId, WorkerStatus};
use crate::queue::Tier;
use std::time::Instant;

/// Point-in-time metrics for one worker.
///
/// Built by the cluster manager and handed to the load balancer by value;
/// the balancer never sees the live worker table.
#[derive(Clone, Debug)]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub id: WorkerId,

    /// Tier this worker services.
    pub tier: Tier,

    /// Lifecycle status at snapshot time.
    pub status: WorkerStatus,

    /// Jobs currently assigned.
    pub current_jobs: usize,

    /// Concurrency capacity.
    pub capacity: usize,

    /// Rolling average processing time in milliseconds.
    pub avg_processing_ms: u64,

    /// Jobs completed since the worker started.
    pub completed: u64,

    /// Jobs failed since the worker started.
    pub failed: u64,

    /// When the worker last reported an error, if ever.
    pub last_error_at: Option<Instant>,

    /// When the oldest currently-running job started, if any.
    pub busy_since: Option<Instant>,

    /// When the worker last became idle, if it is idle.
    pub idle_since: Option<Instant>,
}

impl WorkerSnapshot {
    /// Returns true if the worker can take another job.
    ///
    /// Only idle and processing workers are assignable, and never beyond
    /// their capacity.
    pub fn is_assignable(&self) -> bool {
        matches!(self.status, WorkerStatus::Idle | WorkerStatus::Processing)
            && self.current_jobs < self.capacity
    }

    /// Returns true if the worker errored within `window` of `now`.
    pub fn errored_within(&self, window: std::time::Duration, now: Instant) -> bool {
        self.last_error_at
            .map(|at| now.duration_since(at) < window)
            .unwrap_or(false)
    }
}
