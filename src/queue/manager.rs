//! The tiered queue manager.

use super::backlog::TierBacklog;
use super::stats::{QueueCounters, QueueStats};
use super::tier::{classify, priority_for, Tier};
use crate::events::{EventSink, JobEvent};
use crate::job::Job;
use std::sync::Arc;
use tracing::debug;

/// Maintains one ordered backlog per tier.
///
/// The manager is single-writer: all mutation goes through the coordinator's
/// event loop. Observability counters are shared atomics so the service
/// facade can read them without synchronizing with the loop.
pub struct QueueManager {
    backlogs: [TierBacklog; 3],
    counters: Arc<QueueCounters>,
    large_threshold_bytes: u64,
    events: Arc<dyn EventSink>,
}

impl QueueManager {
    /// Creates a queue manager.
    ///
    /// `large_threshold_bytes` is the payload size at which a job routes to
    /// the large-file tier regardless of plan.
    pub fn new(
        large_threshold_bytes: u64,
        counters: Arc<QueueCounters>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backlogs: [TierBacklog::new(), TierBacklog::new(), TierBacklog::new()],
            counters,
            large_threshold_bytes,
            events,
        }
    }

    /// Classifies a payload into a tier using this manager's threshold.
    pub fn classify(&self, plan: crate::job::Plan, size_bytes: u64) -> Tier {
        classify(plan, size_bytes, self.large_threshold_bytes)
    }

    /// Enqueues a job into its tier backlog.
    ///
    /// The tier is (re)derived from the job's plan and payload size, so a
    /// caller-supplied tier can never bypass the size rule. Emits a
    /// `job-queued` event for fresh submissions; retries re-enter silently
    /// (the caller surfaces them as progress, not as new queue entries).
    pub fn enqueue(&mut self, mut job: Job) {
        job.tier = self.classify(job.plan, job.payload.size_bytes);
        job.requeue();

        let tier = job.tier;
        let priority = priority_for(tier, job.retry_count);
        let is_retry = job.is_retry;

        debug!(
            job_id = %job.id,
            tier = %tier,
            priority = priority,
            is_retry = is_retry,
            "Job enqueued"
        );

        if !is_retry {
            self.events.emit(JobEvent::JobQueued {
                job_id: job.id.clone(),
                owner_id: job.owner_id.clone(),
                tier,
            });
        }

        self.counters.job_queued(tier);
        self.backlogs[tier.index()].push(job, priority);
    }

    /// Dequeues the next job from one tier in (priority, FIFO) order.
    ///
    /// The dequeued job is counted as active; callers must later report it
    /// via [`mark_completed`](Self::mark_completed),
    /// [`mark_failed`](Self::mark_failed), or
    /// [`mark_requeued`](Self::mark_requeued).
    pub fn dequeue(&mut self, tier: Tier) -> Option<Job> {
        let job = self.backlogs[tier.index()].pop()?;
        self.counters.job_dequeued(tier);
        Some(job)
    }

    /// Number of jobs waiting in one tier.
    pub fn waiting(&self, tier: Tier) -> usize {
        self.backlogs[tier.index()].len()
    }

    /// Total jobs waiting across all tiers (the backlog depth used for
    /// scaling decisions).
    pub fn total_waiting(&self) -> usize {
        self.backlogs.iter().map(|b| b.len()).sum()
    }

    /// Records an active job completing successfully.
    pub fn mark_completed(&self, tier: Tier) {
        self.counters.job_completed(tier);
    }

    /// Records an active job permanently failing.
    pub fn mark_failed(&self, tier: Tier) {
        self.counters.job_failed(tier);
    }

    /// Records an active job leaving execution to await a backoff delay.
    ///
    /// The job re-enters counters via [`enqueue`](Self::enqueue) once its
    /// delay elapses.
    pub fn mark_retrying(&self, tier: Tier) {
        self.counters.job_retrying(tier);
    }

    /// Returns a point-in-time snapshot of per-tier counts.
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Drops all waiting jobs (shutdown path).
    pub fn clear(&mut self) {
        for backlog in &mut self.backlogs {
            backlog.clear();
        }
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("premium", &self.backlogs[Tier::Premium.index()].len())
            .field("normal", &self.backlogs[Tier::Normal.index()].len())
            .field("bulk_large", &self.backlogs[Tier::BulkLarge.index()].len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::job::{JobId, PayloadRef, Plan};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MB: u64 = 1024 * 1024;

    fn manager() -> QueueManager {
        QueueManager::new(
            100 * MB,
            Arc::new(QueueCounters::new()),
            Arc::new(NullEventSink),
        )
    }

    fn job(name: &str, plan: Plan, size: u64) -> Job {
        let tier = classify(plan, size, 100 * MB);
        let mut j = Job::new(PayloadRef::new("/data/in/doc.pdf", size), "owner", plan, tier);
        j.id = JobId::new(name);
        j
    }

    #[test]
    fn test_enqueue_routes_by_plan() {
        let mut mgr = manager();
        mgr.enqueue(job("p", Plan::Premium, MB));
        mgr.enqueue(job("n", Plan::Standard, MB));

        assert_eq!(mgr.waiting(Tier::Premium), 1);
        assert_eq!(mgr.waiting(Tier::Normal), 1);
        assert_eq!(mgr.waiting(Tier::BulkLarge), 0);
    }

    #[test]
    fn test_enqueue_routes_large_regardless_of_plan() {
        let mut mgr = manager();
        mgr.enqueue(job("big-premium", Plan::Premium, 200 * MB));
        mgr.enqueue(job("big-standard", Plan::Standard, 150 * MB));

        assert_eq!(mgr.waiting(Tier::BulkLarge), 2);
        assert_eq!(mgr.waiting(Tier::Premium), 0);
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut mgr = manager();
        mgr.enqueue(job("a", Plan::Standard, MB));
        mgr.enqueue(job("b", Plan::Standard, MB));
        mgr.enqueue(job("c", Plan::Standard, MB));

        assert_eq!(mgr.dequeue(Tier::Normal).unwrap().id.as_str(), "a");
        assert_eq!(mgr.dequeue(Tier::Normal).unwrap().id.as_str(), "b");
        assert_eq!(mgr.dequeue(Tier::Normal).unwrap().id.as_str(), "c");
        assert!(mgr.dequeue(Tier::Normal).is_none());
    }

    #[test]
    fn test_retry_boost_jumps_fresh_jobs() {
        let mut mgr = manager();
        mgr.enqueue(job("fresh-1", Plan::Standard, MB));
        mgr.enqueue(job("fresh-2", Plan::Standard, MB));

        let mut retry = job("retry", Plan::Standard, MB);
        retry.retry_count = 2;
        retry.is_retry = true;
        mgr.enqueue(retry);

        // retry_count 2 boosts priority by one, ahead of fresh jobs
        assert_eq!(mgr.dequeue(Tier::Normal).unwrap().id.as_str(), "retry");
        assert_eq!(mgr.dequeue(Tier::Normal).unwrap().id.as_str(), "fresh-1");
    }

    #[test]
    fn test_enqueue_emits_job_queued_event_once() {
        struct CountingSink(AtomicUsize);
        impl EventSink for CountingSink {
            fn emit(&self, event: JobEvent) {
                if matches!(event, JobEvent::JobQueued { .. }) {
                    self.0.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut mgr = QueueManager::new(
            100 * MB,
            Arc::new(QueueCounters::new()),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );

        mgr.enqueue(job("fresh", Plan::Standard, MB));
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);

        let mut retry = job("retry", Plan::Standard, MB);
        retry.is_retry = true;
        retry.retry_count = 1;
        mgr.enqueue(retry);
        // Retries do not re-announce as queued.
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stats_track_waiting_and_active() {
        let mut mgr = manager();
        mgr.enqueue(job("a", Plan::Premium, MB));
        mgr.enqueue(job("b", Plan::Premium, MB));

        assert_eq!(mgr.stats().premium.waiting, 2);

        let dequeued = mgr.dequeue(Tier::Premium).unwrap();
        assert_eq!(mgr.stats().premium.waiting, 1);
        assert_eq!(mgr.stats().premium.active, 1);

        mgr.mark_completed(dequeued.tier);
        assert_eq!(mgr.stats().premium.active, 0);
        assert_eq!(mgr.stats().premium.completed, 1);
    }

    #[test]
    fn test_total_waiting_spans_tiers() {
        let mut mgr = manager();
        mgr.enqueue(job("a", Plan::Premium, MB));
        mgr.enqueue(job("b", Plan::Standard, MB));
        mgr.enqueue(job("c", Plan::Standard, 300 * MB));

        assert_eq!(mgr.total_waiting(), 3);
    }
}
