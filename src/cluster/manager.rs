//! The cluster manager.

use super::worker::{
    Assignment, WorkerEvent, WorkerId, WorkerRuntime, WorkerStats, WorkerStatus,
    DEFAULT_ASSIGNMENT_CHANNEL_CAPACITY,
};
use crate::balancer::{ScaleRecommendation, WorkerSnapshot};
use crate::breaker::CircuitBreaker;
use crate::config::{ClusterSettings, HealthSettings};
use crate::extract::Extractor;
use crate::job::{Job, JobId};
use crate::queue::Tier;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Relative worker share per tier: premium gets the most dedicated
/// workers, the large-file tier the fewest. This is how premium jobs are
/// serviced preferentially without starving other tiers.
const TIER_WORKER_WEIGHTS: [(Tier, usize); 3] = [
    (Tier::Premium, 3),
    (Tier::Normal, 2),
    (Tier::BulkLarge, 1),
];

/// Point-in-time cluster health.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterHealth {
    /// Workers in the table (any non-stopped status).
    pub total_workers: usize,
    /// Workers idle or processing.
    pub active_workers: usize,
    /// Workers in error state.
    pub error_workers: usize,
    /// True when no workers are erroring and the minimum is staffed.
    pub is_healthy: bool,
}

/// Shared atomic cluster gauges, written by the manager and read by the
/// service facade.
pub struct ClusterGauges {
    total: AtomicUsize,
    active: AtomicUsize,
    error: AtomicUsize,
    min_workers: AtomicUsize,
}

impl ClusterGauges {
    /// Creates zeroed gauges.
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            error: AtomicUsize::new(0),
            min_workers: AtomicUsize::new(0),
        }
    }

    /// Returns a health snapshot.
    pub fn health(&self) -> ClusterHealth {
        let total = self.total.load(Ordering::Relaxed);
        let active = self.active.load(Ordering::Relaxed);
        let error = self.error.load(Ordering::Relaxed);
        let min = self.min_workers.load(Ordering::Relaxed);
        ClusterHealth {
            total_workers: total,
            active_workers: active,
            error_workers: error,
            is_healthy: error == 0 && total >= min,
        }
    }

    fn store(&self, total: usize, active: usize, error: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.active.store(active, Ordering::Relaxed);
        self.error.store(error, Ordering::Relaxed);
    }
}

impl Default for ClusterGauges {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerEntry {
    tier: Tier,
    status: WorkerStatus,
    capacity: usize,
    current_jobs: HashMap<JobId, Instant>,
    stats: WorkerStats,
    assign_tx: mpsc::Sender<Assignment>,
    cancel: CancellationToken,
    idle_since: Option<Instant>,
}

/// Owns the worker table and the worker lifecycle.
///
/// Single-writer: only the coordinator's event loop calls mutating
/// methods. The load balancer sees immutable [`WorkerSnapshot`]s, never
/// this table.
pub struct ClusterManager {
    settings: ClusterSettings,
    health_settings: HealthSettings,
    workers: HashMap<WorkerId, WorkerEntry>,
    heartbeats: Arc<DashMap<WorkerId, Instant>>,
    extractor: Arc<dyn Extractor>,
    breaker: Arc<CircuitBreaker>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    gauges: Arc<ClusterGauges>,
    shutdown: CancellationToken,
}

impl ClusterManager {
    /// Creates a cluster manager. No workers are spawned until
    /// [`ensure_min_workers`](Self::ensure_min_workers).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ClusterSettings,
        health_settings: HealthSettings,
        extractor: Arc<dyn Extractor>,
        breaker: Arc<CircuitBreaker>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        heartbeats: Arc<DashMap<WorkerId, Instant>>,
        gauges: Arc<ClusterGauges>,
        shutdown: CancellationToken,
    ) -> Self {
        gauges.min_workers.store(settings.min_workers, Ordering::Relaxed);
        Self {
            settings,
            health_settings,
            workers: HashMap::new(),
            heartbeats,
            extractor,
            breaker,
            events_tx,
            gauges,
            shutdown,
        }
    }

    /// Spawns workers until the configured minimum is staffed.
    pub fn ensure_min_workers(&mut self) {
        while self.live_count() < self.settings.min_workers {
            let tier = self.pick_spawn_tier();
            self.spawn_worker(tier);
        }
    }

    /// Spawns one worker bound to `tier`.
    pub fn spawn_worker(&mut self, tier: Tier) -> WorkerId {
        let id = WorkerId::auto();
        let (assign_tx, assign_rx) = mpsc::channel(DEFAULT_ASSIGNMENT_CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();

        let runtime = WorkerRuntime::new(
            id.clone(),
            assign_rx,
            Arc::clone(&self.heartbeats),
            Arc::clone(&self.extractor),
            Arc::clone(&self.breaker),
            self.events_tx.clone(),
            self.health_settings.heartbeat_interval,
            self.health_settings.job_timeout,
        );

        let mut entry = WorkerEntry {
            tier,
            status: WorkerStatus::Starting,
            capacity: self.settings.worker_capacity.max(1),
            current_jobs: HashMap::new(),
            stats: WorkerStats::default(),
            assign_tx,
            cancel: cancel.clone(),
            idle_since: None,
        };

        tokio::spawn(runtime.run(cancel));

        // In-process spawn succeeds immediately; the worker is assignable
        // as soon as its task is scheduled.
        entry.status = WorkerStatus::Idle;
        entry.idle_since = Some(Instant::now());

        info!(worker_id = %id, tier = %tier, "Worker spawned");
        self.workers.insert(id.clone(), entry);
        self.refresh_gauges();
        id
    }

    /// Retires one idle worker gracefully, if any.
    ///
    /// Never stops a worker mid-job outside the failure path.
    pub fn retire_idle_worker(&mut self) -> Option<WorkerId> {
        let id = self
            .workers
            .iter()
            .filter(|(_, e)| e.status == WorkerStatus::Idle && e.current_jobs.is_empty())
            .min_by_key(|(_, e)| e.idle_since)
            .map(|(id, _)| id.clone())?;

        let entry = self.workers.get_mut(&id)?;
        entry.status = WorkerStatus::Stopping;
        entry.cancel.cancel();
        info!(worker_id = %id, "Worker retiring");
        self.refresh_gauges();
        Some(id)
    }

    /// Replaces a failed worker: spawn the successor first, then stop the
    /// failed one, so capacity never dips.
    ///
    /// Returns the replacement's ID, or `None` if the worker is unknown.
    pub fn replace_worker(&mut self, id: &WorkerId) -> Option<WorkerId> {
        let tier = self.workers.get(id)?.tier;

        let replacement = self.spawn_worker(tier);

        let entry = self.workers.get_mut(id)?;
        entry.status = WorkerStatus::Error;
        entry.cancel.cancel();
        warn!(
            worker_id = %id,
            replacement = %replacement,
            tier = %tier,
            "Worker replaced"
        );
        self.refresh_gauges();
        Some(replacement)
    }

    /// Hands a job to a worker.
    ///
    /// Returns false if the worker is unknown, not assignable, at capacity,
    /// or its channel is full.
    pub fn assign(&mut self, worker_id: &WorkerId, job: &Job) -> bool {
        let Some(entry) = self.workers.get_mut(worker_id) else {
            return false;
        };
        if !entry.status.is_active() || entry.current_jobs.len() >= entry.capacity {
            return false;
        }

        let assignment = Assignment { job: job.clone() };
        if entry.assign_tx.try_send(assignment).is_err() {
            warn!(worker_id = %worker_id, "Assignment channel full");
            return false;
        }

        entry.current_jobs.insert(job.id.clone(), Instant::now());
        entry.status = WorkerStatus::Processing;
        entry.idle_since = None;
        debug!(worker_id = %worker_id, job_id = %job.id, "Job assigned");
        self.refresh_gauges();
        true
    }

    /// Records a job finishing on a worker.
    pub fn on_job_finished(
        &mut self,
        worker_id: &WorkerId,
        job_id: &JobId,
        success: bool,
        duration: std::time::Duration,
    ) {
        let Some(entry) = self.workers.get_mut(worker_id) else {
            return;
        };
        entry.current_jobs.remove(job_id);
        if success {
            entry.stats.record_success(duration);
        } else {
            entry.stats.record_failure();
        }
        if entry.current_jobs.is_empty() && entry.status == WorkerStatus::Processing {
            entry.status = WorkerStatus::Idle;
            entry.idle_since = Some(Instant::now());
        }
        self.refresh_gauges();
    }

    /// Removes a job from a worker without touching its stats.
    ///
    /// Used for circuit-open rejections: the engine was never invoked, so
    /// the outcome says nothing about the worker.
    pub fn on_job_released(&mut self, worker_id: &WorkerId, job_id: &JobId) {
        let Some(entry) = self.workers.get_mut(worker_id) else {
            return;
        };
        entry.current_jobs.remove(job_id);
        if entry.current_jobs.is_empty() && entry.status == WorkerStatus::Processing {
            entry.status = WorkerStatus::Idle;
            entry.idle_since = Some(Instant::now());
        }
        self.refresh_gauges();
    }

    /// Handles a worker's run loop exiting.
    ///
    /// Returns `(expected, orphaned_jobs)`: `expected` is false when the
    /// worker was not being retired or replaced, in which case its orphaned
    /// jobs must go through the failure path.
    pub fn handle_worker_stopped(&mut self, worker_id: &WorkerId) -> (bool, Vec<JobId>) {
        let Some(entry) = self.workers.remove(worker_id) else {
            return (true, Vec::new());
        };
        let expected = matches!(
            entry.status,
            WorkerStatus::Stopping | WorkerStatus::Error | WorkerStatus::Stopped
        );
        let orphaned: Vec<JobId> = entry.current_jobs.keys().cloned().collect();
        if !expected {
            warn!(worker_id = %worker_id, orphaned = orphaned.len(), "Worker stopped unexpectedly");
        }
        self.refresh_gauges();
        (expected, orphaned)
    }

    /// Jobs currently assigned to one worker.
    pub fn jobs_on_worker(&self, worker_id: &WorkerId) -> Vec<JobId> {
        self.workers
            .get(worker_id)
            .map(|e| e.current_jobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Tier a worker services.
    pub fn worker_tier(&self, worker_id: &WorkerId) -> Option<Tier> {
        self.workers.get(worker_id).map(|e| e.tier)
    }

    /// Builds immutable snapshots of all workers for the load balancer.
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|(id, e)| WorkerSnapshot {
                id: id.clone(),
                tier: e.tier,
                status: e.status,
                current_jobs: e.current_jobs.len(),
                capacity: e.capacity,
                avg_processing_ms: e.stats.avg_processing_ms(),
                completed: e.stats.completed,
                failed: e.stats.failed,
                last_error_at: e.stats.last_error_at,
                busy_since: e.current_jobs.values().min().copied(),
                idle_since: e.idle_since,
            })
            .collect()
    }

    /// Ensures at least one worker services `tier`, spawning one if the
    /// worker bounds allow.
    ///
    /// Tier affinity is set at spawn time, so a freshly scaled-down cluster
    /// can be left with backlogged tiers nothing serves; the dispatcher
    /// calls this before trying to place work.
    ///
    /// Returns true if the tier has (or now has) coverage.
    pub fn ensure_tier_coverage(&mut self, tier: Tier) -> bool {
        let covered = self.workers.values().any(|e| {
            e.tier == tier && (e.status.is_active() || e.status == WorkerStatus::Starting)
        });
        if covered {
            return true;
        }
        if self.live_count() < self.settings.max_workers {
            info!(tier = %tier, "Spawning worker for uncovered tier");
            self.spawn_worker(tier);
            return true;
        }
        false
    }

    /// One scaling step against the backlog depth.
    ///
    /// Scale-up and scale-down move one worker per evaluation so the pool
    /// adjusts gradually instead of thrashing.
    pub fn evaluate_scaling(&mut self, backlog: usize) {
        let live = self.live_count();
        if backlog >= self.settings.scale_up_threshold && live < self.settings.max_workers {
            let tier = self.pick_spawn_tier();
            info!(backlog, workers = live, tier = %tier, "Scaling up");
            self.spawn_worker(tier);
        } else if backlog <= self.settings.scale_down_threshold && live > self.settings.min_workers
        {
            if let Some(id) = self.retire_idle_worker() {
                info!(backlog, workers = live, worker_id = %id, "Scaling down");
            }
        }
    }

    /// Applies a load balancer recommendation, bounded by min/max workers.
    pub fn apply_recommendation(&mut self, recommendation: ScaleRecommendation) {
        match recommendation {
            ScaleRecommendation::ScaleUp => {
                if self.live_count() < self.settings.max_workers {
                    let tier = self.pick_spawn_tier();
                    info!(tier = %tier, "Scaling up on balancer recommendation");
                    self.spawn_worker(tier);
                }
            }
            ScaleRecommendation::ScaleDown => {
                if self.live_count() > self.settings.min_workers {
                    self.retire_idle_worker();
                }
            }
            ScaleRecommendation::Maintain => {}
        }
    }

    /// Marks a worker as errored without replacing it.
    pub fn mark_error(&mut self, worker_id: &WorkerId) {
        if let Some(entry) = self.workers.get_mut(worker_id) {
            entry.status = WorkerStatus::Error;
            entry.stats.record_failure();
            self.refresh_gauges();
        }
    }

    /// Returns current cluster health.
    pub fn health(&self) -> ClusterHealth {
        self.gauges.health()
    }

    /// Workers currently counting toward capacity (not stopping/erroring).
    pub fn live_count(&self) -> usize {
        self.workers
            .values()
            .filter(|e| matches!(e.status, WorkerStatus::Starting) || e.status.is_active())
            .count()
    }

    /// Stops all workers (shutdown path).
    pub fn stop_all(&mut self) {
        for (id, entry) in self.workers.iter_mut() {
            entry.status = WorkerStatus::Stopping;
            entry.cancel.cancel();
            debug!(worker_id = %id, "Worker stop requested");
        }
        self.refresh_gauges();
    }

    /// Picks the tier whose worker share is furthest below its weight.
    fn pick_spawn_tier(&self) -> Tier {
        let mut counts: HashMap<Tier, usize> = HashMap::new();
        for entry in self.workers.values() {
            if entry.status.is_active() || entry.status == WorkerStatus::Starting {
                *counts.entry(entry.tier).or_insert(0) += 1;
            }
        }

        TIER_WORKER_WEIGHTS
            .iter()
            .min_by(|(tier_a, weight_a), (tier_b, weight_b)| {
                let share_a = counts.get(tier_a).copied().unwrap_or(0) as f64 / *weight_a as f64;
                let share_b = counts.get(tier_b).copied().unwrap_or(0) as f64 / *weight_b as f64;
                share_a.partial_cmp(&share_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(tier, _)| *tier)
            .unwrap_or(Tier::Normal)
    }

    fn refresh_gauges(&self) {
        let mut total = 0;
        let mut active = 0;
        let mut error = 0;
        for entry in self.workers.values() {
            if entry.status != WorkerStatus::Stopped {
                total += 1;
            }
            if entry.status.is_active() {
                active += 1;
            }
            if entry.status == WorkerStatus::Error {
                error += 1;
            }
        }
        self.gauges.store(total, active, error);
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("workers", &self.workers.len())
            .field("health", &self.health())
            .finish()
    }
}
