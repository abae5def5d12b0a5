//! Point-in-time queue statistics.
//!
//! Counters are atomics so the service facade can snapshot them without
//! going through the coordinator's event loop.

use super::tier::Tier;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-tier counts at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Jobs waiting in the backlog.
    pub waiting: u64,
    /// Jobs admitted and executing (or awaiting a worker).
    pub active: u64,
    /// Jobs completed since startup.
    pub completed: u64,
    /// Jobs permanently failed since startup.
    pub failed: u64,
}

/// Snapshot of all tiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Premium tier counts.
    pub premium: TierStats,
    /// Normal tier counts.
    pub normal: TierStats,
    /// Large-file tier counts.
    pub bulk_large: TierStats,
}

impl QueueStats {
    /// Returns the stats for one tier.
    pub fn tier(&self, tier: Tier) -> TierStats {
        match tier {
            Tier::Premium => self.premium,
            Tier::Normal => self.normal,
            Tier::BulkLarge => self.bulk_large,
        }
    }

    /// Total jobs waiting across all tiers.
    pub fn total_waiting(&self) -> u64 {
        self.premium.waiting + self.normal.waiting + self.bulk_large.waiting
    }
}

#[derive(Default)]
struct TierCounters {
    waiting: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            waiting: self.waiting.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe per-tier counters shared between the queue manager (writer)
/// and the service facade (reader).
#[derive(Default)]
pub struct QueueCounters {
    tiers: [TierCounters; 3],
}

impl QueueCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: Tier) -> &TierCounters {
        &self.tiers[tier.index()]
    }

    /// Records a job entering the backlog.
    pub fn job_queued(&self, tier: Tier) {
        self.tier(tier).waiting.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a job leaving the backlog for admission.
    pub fn job_dequeued(&self, tier: Tier) {
        self.tier(tier).waiting.fetch_sub(1, Ordering::Relaxed);
        self.tier(tier).active.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a job completing successfully.
    pub fn job_completed(&self, tier: Tier) {
        self.tier(tier).active.fetch_sub(1, Ordering::Relaxed);
        self.tier(tier).completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a job permanently failing.
    pub fn job_failed(&self, tier: Tier) {
        self.tier(tier).active.fetch_sub(1, Ordering::Relaxed);
        self.tier(tier).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an active job leaving execution to await a retry.
    ///
    /// The job is neither waiting nor active while its backoff delay runs;
    /// re-enqueueing it later counts it as waiting again.
    pub fn job_retrying(&self, tier: Tier) {
        self.tier(tier).active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all tiers.
    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            premium: self.tier(Tier::Premium).snapshot(),
            normal: self.tier(Tier::Normal).snapshot(),
            bulk_large: self.tier(Tier::BulkLarge).snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_lifecycle() {
        let counters = QueueCounters::new();

        counters.job_queued(Tier::Premium);
        counters.job_queued(Tier::Premium);
        let stats = counters.snapshot();
        assert_eq!(stats.premium.waiting, 2);

        counters.job_dequeued(Tier::Premium);
        let stats = counters.snapshot();
        assert_eq!(stats.premium.waiting, 1);
        assert_eq!(stats.premium.active, 1);

        counters.job_completed(Tier::Premium);
        let stats = counters.snapshot();
        assert_eq!(stats.premium.active, 0);
        assert_eq!(stats.premium.completed, 1);
    }

    #[test]
    fn test_retrying_leaves_active_until_requeued() {
        let counters = QueueCounters::new();
        counters.job_queued(Tier::Normal);
        counters.job_dequeued(Tier::Normal);
        counters.job_retrying(Tier::Normal);

        let stats = counters.snapshot();
        assert_eq!(stats.normal.waiting, 0);
        assert_eq!(stats.normal.active, 0);

        // Backoff elapsed, job re-enters the backlog.
        counters.job_queued(Tier::Normal);
        assert_eq!(counters.snapshot().normal.waiting, 1);
    }

    #[test]
    fn test_total_waiting() {
        let counters = QueueCounters::new();
        counters.job_queued(Tier::Premium);
        counters.job_queued(Tier::Normal);
        counters.job_queued(Tier::BulkLarge);

        assert_eq!(counters.snapshot().total_waiting(), 3);
    }

    #[test]
    fn test_tiers_are_independent() {
        let counters = QueueCounters::new();
        counters.job_queued(Tier::Premium);

        let stats = counters.snapshot();
        assert_eq!(stats.premium.waiting, 1);
        assert_eq!(stats.normal.waiting, 0);
        assert_eq!(stats.bulk_large.waiting, 0);
    }
}
