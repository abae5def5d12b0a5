//! The recovery coordinator: the orchestrator's control loop.
//!
//! One event loop owns all controller mutation: queue, worker table,
//! balancer rotation, and recovery tracking are each mutated only through
//! their owning component, and only from this loop. Workers and the memory
//! monitor communicate with the loop through channels; the durable store is
//! written by a dedicated best-effort persistence task so a slow store can
//! never block scheduling.
//!
//! The loop's clock tick drives everything time-based from one source:
//! due retries, the worker health check, circuit breaker counter decay, and
//! the scratch sweep.

use super::manager::{FailureDisposition, FailureRecoveryManager, PendingRetry};
use crate::balancer::{evaluate_load, LoadBalancer, ScaleRecommendation, Strategy};
use crate::breaker::CircuitBreaker;
use crate::cluster::{ClusterManager, JobOutcome, WorkerEvent, WorkerId};
use crate::config::Settings;
use crate::events::{EventSink, JobEvent};
use crate::job::{Job, JobId, JobStatus, PayloadRef};
use crate::pool::{AdmissionTicket, ResourcePool};
use crate::queue::{QueueManager, Tier};
use crate::store::{JobRecord, JobStore, JobUpdate};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval between scratch sweeps.
const SCRATCH_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A job handed to the coordinator by the service facade.
pub struct SubmittedJob {
    /// The job, already classified into a tier.
    pub job: Job,
    /// Status channel backing the submitter's handle.
    pub status_tx: watch::Sender<JobStatus>,
}

struct ActiveJob {
    job: Job,
    status_tx: watch::Sender<JobStatus>,
    /// Held for the job's admitted lifetime (the slot itself is released
    /// through the pool by job id).
    #[allow(dead_code)]
    ticket: Option<AdmissionTicket>,
}

enum PersistOp {
    Create(JobRecord),
    Update(JobId, JobUpdate),
}

/// The orchestrator's control loop.
pub struct RecoveryCoordinator {
    settings: Settings,
    queue: QueueManager,
    cluster: ClusterManager,
    balancer: LoadBalancer,
    recovery: FailureRecoveryManager,
    pool: Arc<ResourcePool>,
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    breaker: Arc<CircuitBreaker>,

    submit_rx: mpsc::Receiver<SubmittedJob>,
    worker_events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    admitted_tx: mpsc::UnboundedSender<(JobId, Tier, Option<AdmissionTicket>)>,
    admitted_rx: mpsc::UnboundedReceiver<(JobId, Tier, Option<AdmissionTicket>)>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
    persist_rx: Option<mpsc::UnboundedReceiver<PersistOp>>,

    active: HashMap<JobId, ActiveJob>,
    ready: [VecDeque<JobId>; 3],
    pending_admissions: [usize; 3],

    last_breaker_tick: Instant,
    last_sweep: Instant,
    last_activity_ms: Arc<AtomicU64>,
    pending_work_count: Arc<AtomicU64>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator from its pre-wired components.
    ///
    /// The service facade owns construction; see `service::Orchestrator`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        queue: QueueManager,
        cluster: ClusterManager,
        balancer: LoadBalancer,
        recovery: FailureRecoveryManager,
        pool: Arc<ResourcePool>,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        breaker: Arc<CircuitBreaker>,
        submit_rx: mpsc::Receiver<SubmittedJob>,
        worker_events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        let (admitted_tx, admitted_rx) = mpsc::unbounded_channel();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            settings,
            queue,
            cluster,
            balancer,
            recovery,
            pool,
            store,
            events,
            breaker,
            submit_rx,
            worker_events_rx,
            admitted_tx,
            admitted_rx,
            persist_tx,
            persist_rx: Some(persist_rx),
            active: HashMap::new(),
            ready: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            pending_admissions: [0; 3],
            last_breaker_tick: Instant::now(),
            last_sweep: Instant::now(),
            last_activity_ms: Arc::new(AtomicU64::new(now_ms)),
            pending_work_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Overrides the load balancing strategy (default: weighted round
    /// robin).
    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.balancer = LoadBalancer::new(strategy);
    }

    /// Shared activity counters for the stall watchdog.
    pub fn activity_tracking(&self) -> (Arc<AtomicU64>, Arc<AtomicU64>) {
        (
            Arc::clone(&self.last_activity_ms),
            Arc::clone(&self.pending_work_count),
        )
    }

    /// Runs the coordinator until shutdown is signalled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(version = crate::VERSION, "Coordinator starting");

        self.spawn_persistence_writer();
        self.cluster.ensure_min_workers();
        self.recover_from_store().await;
        self.dispatch_pending();
        self.dispatch_ready();

        let mut clock = tokio::time::interval(self.settings.health.clock_resolution);
        clock.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut scale = tokio::time::interval(self.settings.cluster.scale_interval);
        scale.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            self.stamp_activity();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.shutdown_all();
                    break;
                }

                Some(submitted) = self.submit_rx.recv() => {
                    self.handle_submission(submitted);
                }

                Some((job_id, tier, ticket)) = self.admitted_rx.recv() => {
                    self.handle_admitted(job_id, tier, ticket);
                }

                Some(event) = self.worker_events_rx.recv() => {
                    self.handle_worker_event(event);
                }

                _ = clock.tick() => {
                    self.on_clock_tick();
                }

                _ = scale.tick() => {
                    self.on_scale_tick();
                }
            }

            self.dispatch_pending();
            self.dispatch_ready();
            self.update_pending_work();
        }

        info!("Coordinator stopped");
    }

    // -------------------------------------------------------------------------
    // Submission and admission
    // -------------------------------------------------------------------------

    fn handle_submission(&mut self, submitted: SubmittedJob) {
        let SubmittedJob { job, status_tx } = submitted;

        info!(
            job_id = %job.id,
            owner = %job.owner_id,
            tier = %job.tier,
            size_bytes = job.payload.size_bytes,
            "Job submitted"
        );

        self.persist(PersistOp::Create(JobRecord::from_job(&job)));
        self.active.insert(
            job.id.clone(),
            ActiveJob {
                job: job.clone(),
                status_tx,
                ticket: None,
            },
        );
        self.queue.enqueue(job);
    }

    /// Moves backlogged jobs into pool admission, bounded by the tier's
    /// free worker capacity so premium workers are never starved by an
    /// over-eager lower tier.
    fn dispatch_pending(&mut self) {
        for tier in Tier::ALL {
            let idx = tier.index();
            loop {
                if self.queue.waiting(tier) == 0 {
                    break;
                }
                self.cluster.ensure_tier_coverage(tier);
                let capacity = self.assignable_capacity(tier);
                let outstanding = self.ready[idx].len() + self.pending_admissions[idx];
                if outstanding >= capacity {
                    break;
                }
                let Some(job) = self.queue.dequeue(tier) else {
                    break;
                };
                let job_id = job.id.clone();
                let size = job.payload.size_bytes;

                match self.active.get_mut(&job_id) {
                    Some(entry) => entry.job = job,
                    None => {
                        error!(job_id = %job_id, "Dequeued job has no active entry");
                        self.queue.mark_failed(tier);
                        continue;
                    }
                }

                self.pending_admissions[idx] += 1;
                let pool = Arc::clone(&self.pool);
                let admitted_tx = self.admitted_tx.clone();
                tokio::spawn(async move {
                    let ticket = pool.acquire(&job_id, size).await.ok();
                    let _ = admitted_tx.send((job_id, tier, ticket));
                });
            }
        }
    }

    fn handle_admitted(&mut self, job_id: JobId, tier: Tier, ticket: Option<AdmissionTicket>) {
        self.pending_admissions[tier.index()] =
            self.pending_admissions[tier.index()].saturating_sub(1);

        let Some(entry) = self.active.get_mut(&job_id) else {
            if ticket.is_some() {
                self.pool.release(&job_id);
            }
            return;
        };

        match ticket {
            Some(ticket) => {
                debug!(job_id = %job_id, class = %ticket.class(), "Job admitted");
                entry.ticket = Some(ticket);
                self.ready[tier.index()].push_back(job_id);
            }
            None => {
                // Pool shut down mid-admission; the loop is going down too.
                debug!(job_id = %job_id, "Admission aborted by pool shutdown");
            }
        }
    }

    /// Assigns admitted jobs to workers selected by the load balancer.
    fn dispatch_ready(&mut self) {
        for tier in Tier::ALL {
            let idx = tier.index();
            while !self.ready[idx].is_empty() {
                self.cluster.ensure_tier_coverage(tier);
                let snapshots = self.cluster.snapshots();
                let Some(worker_id) = self.balancer.select_worker(tier, &snapshots) else {
                    break;
                };
                let Some(job_id) = self.ready[idx].pop_front() else {
                    break;
                };
                let Some(entry) = self.active.get_mut(&job_id) else {
                    continue;
                };

                entry.job.assign(worker_id.clone());
                if !self.cluster.assign(&worker_id, &entry.job) {
                    // Snapshot raced a completion; retry this job next pass.
                    entry.job.requeue();
                    self.ready[idx].push_front(job_id);
                    break;
                }

                entry.job.start();
                let owner_id = entry.job.owner_id.clone();
                let _ = entry.status_tx.send(JobStatus::Processing);
                self.recovery.job_assigned(job_id.clone(), worker_id.clone());
                self.persist(PersistOp::Update(
                    job_id.clone(),
                    JobUpdate::status(JobStatus::Processing),
                ));
                self.events.emit(JobEvent::JobStarted {
                    job_id: job_id.clone(),
                    owner_id,
                    worker_id: worker_id.to_string(),
                });
                info!(job_id = %job_id, worker_id = %worker_id, tier = %tier, "Job dispatched");
            }
        }
    }

    fn assignable_capacity(&self, tier: Tier) -> usize {
        self.cluster
            .snapshots()
            .iter()
            .filter(|s| s.tier == tier && s.is_assignable())
            .map(|s| s.capacity - s.current_jobs)
            .sum()
    }

    // -------------------------------------------------------------------------
    // Worker events
    // -------------------------------------------------------------------------

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::JobFinished {
                worker_id,
                job_id,
                outcome,
                duration,
            } => self.handle_job_finished(worker_id, job_id, outcome, duration),
            WorkerEvent::Stopped { worker_id } => self.handle_worker_stopped(worker_id),
        }
    }

    fn handle_job_finished(
        &mut self,
        worker_id: WorkerId,
        job_id: JobId,
        outcome: JobOutcome,
        duration: Duration,
    ) {
        if matches!(outcome, JobOutcome::CircuitRejected(_)) {
            self.cluster.on_job_released(&worker_id, &job_id);
        } else {
            self.cluster
                .on_job_finished(&worker_id, &job_id, outcome.is_success(), duration);
        }

        let Some(entry) = self.active.get_mut(&job_id) else {
            return;
        };
        // A worker flagged failed may still deliver a late result after its
        // job was rescheduled; at-least-once semantics make dropping it safe.
        if entry.job.assigned_worker.as_ref() != Some(&worker_id)
            || entry.job.status != JobStatus::Processing
        {
            debug!(job_id = %job_id, worker_id = %worker_id, "Stale job result ignored");
            return;
        }

        match outcome {
            JobOutcome::Completed(output) => {
                let tier = entry.job.tier;
                let owner_id = entry.job.owner_id.clone();
                entry.job.complete();
                let _ = entry.status_tx.send(JobStatus::Completed);

                self.pool.release(&job_id);
                self.recovery.job_finished(&job_id);
                self.queue.mark_completed(tier);
                self.persist(PersistOp::Update(
                    job_id.clone(),
                    JobUpdate::status(JobStatus::Completed),
                ));
                self.events.emit(JobEvent::JobCompleted {
                    job_id: job_id.clone(),
                    owner_id,
                    duration,
                });
                info!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    duration_ms = duration.as_millis() as u64,
                    output_bytes = output.bytes,
                    "Job completed"
                );
                self.active.remove(&job_id);
            }
            JobOutcome::Failed(reason) => {
                self.pool.release(&job_id);
                self.fail_job(&job_id, &reason);
            }
            JobOutcome::TimedOut => {
                self.pool.release(&job_id);
                self.fail_job(&job_id, "hard processing timeout exceeded");
            }
            JobOutcome::CircuitRejected(reason) => {
                // Fast-fail without charging the retry budget: the engine
                // was never invoked.
                self.pool.release(&job_id);
                let tier = entry.job.tier;
                let owner_id = entry.job.owner_id.clone();
                entry.job.requeue();
                let _ = entry.status_tx.send(JobStatus::Queued);
                self.queue.mark_retrying(tier);
                self.events.emit(JobEvent::JobProgress {
                    job_id: job_id.clone(),
                    owner_id,
                    note: format!("conversion engine unavailable ({}), re-queued", reason),
                });
                let retry_in = self.settings.breaker.circuit_timeout;
                self.recovery
                    .schedule_requeue(entry.job.clone(), retry_in, &reason);
            }
        }
    }

    fn handle_worker_stopped(&mut self, worker_id: WorkerId) {
        let tier = self.cluster.worker_tier(&worker_id);
        let (expected, orphaned) = self.cluster.handle_worker_stopped(&worker_id);
        if expected {
            return;
        }

        self.events.emit(JobEvent::SystemAlert {
            reason: format!("worker {} stopped unexpectedly", worker_id),
        });
        if let Some(tier) = tier {
            self.balancer.reset_rotation(tier);
            self.cluster.spawn_worker(tier);
        }
        for job_id in orphaned {
            self.pool.release(&job_id);
            self.fail_job(&job_id, "worker stopped unexpectedly");
        }
    }

    /// Routes a job failure through retry scheduling or permanent
    /// escalation.
    fn fail_job(&mut self, job_id: &JobId, reason: &str) {
        let Some(entry) = self.active.get_mut(job_id) else {
            return;
        };
        let tier = entry.job.tier;
        let owner_id = entry.job.owner_id.clone();
        let max_retries = self.settings.retry.max_retries;

        match self.recovery.handle_job_failure(&mut entry.job, reason) {
            FailureDisposition::RetryScheduled { attempt, delay } => {
                let retry_count = entry.job.retry_count;
                let _ = entry.status_tx.send(JobStatus::Failed);
                self.queue.mark_retrying(tier);
                self.persist(PersistOp::Update(
                    job_id.clone(),
                    JobUpdate::retrying(retry_count),
                ));
                // Retrying is surfaced as stalled progress, not failure.
                self.events.emit(JobEvent::JobProgress {
                    job_id: job_id.clone(),
                    owner_id,
                    note: format!(
                        "retry {} of {} scheduled in {}ms",
                        attempt,
                        max_retries,
                        delay.as_millis()
                    ),
                });
                warn!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = reason,
                    "Job failed, retry scheduled"
                );
            }
            FailureDisposition::PermanentlyFailed => {
                let retry_count = entry.job.retry_count;
                let _ = entry.status_tx.send(JobStatus::PermanentlyFailed);
                self.queue.mark_failed(tier);
                self.persist(PersistOp::Update(
                    job_id.clone(),
                    JobUpdate::permanently_failed(retry_count, reason),
                ));
                self.events.emit(JobEvent::JobFailed {
                    job_id: job_id.clone(),
                    owner_id,
                    reason: reason.to_string(),
                    retry_count,
                });
                error!(
                    job_id = %job_id,
                    retry_count,
                    reason = reason,
                    "Job permanently failed"
                );
                self.active.remove(job_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Clock
    // -------------------------------------------------------------------------

    fn on_clock_tick(&mut self) {
        let now = Instant::now();
        let outcome = self.recovery.on_tick(now);

        for retry in outcome.due_retries {
            self.requeue_job(retry);
        }
        if outcome.run_health_check {
            self.run_health_check(now);
        }
        if now.duration_since(self.last_breaker_tick) >= self.settings.breaker.monitor_interval {
            self.last_breaker_tick = now;
            self.breaker.monitor_tick();
        }
        if now.duration_since(self.last_sweep) >= SCRATCH_SWEEP_INTERVAL {
            self.last_sweep = now;
            let swept = self.pool.sweep_scratch();
            if swept > 0 {
                debug!(swept, "Scratch sweep reclaimed directories");
            }
        }
    }

    fn requeue_job(&mut self, retry: PendingRetry) {
        let PendingRetry { job, reason } = retry;
        let Some(entry) = self.active.get_mut(&job.id) else {
            return;
        };
        debug!(job_id = %job.id, reason = %reason, "Backoff elapsed, re-entering tier backlog");
        entry.job = job.clone();
        entry.ticket = None;
        let _ = entry.status_tx.send(JobStatus::Queued);
        self.queue.enqueue(job);
    }

    fn run_health_check(&mut self, now: Instant) {
        for failure in self.recovery.check_worker_health(now) {
            self.events.emit(JobEvent::SystemAlert {
                reason: format!("worker {} failed: {}", failure.worker_id, failure.reason),
            });

            let tier = self.cluster.worker_tier(&failure.worker_id);
            self.cluster.replace_worker(&failure.worker_id);
            if let Some(tier) = tier {
                self.balancer.reset_rotation(tier);
            }

            for job_id in failure.jobs {
                self.pool.release(&job_id);
                self.fail_job(&job_id, &failure.reason);
            }
        }
    }

    fn on_scale_tick(&mut self) {
        self.cluster.evaluate_scaling(self.queue.total_waiting());

        let recommendation = evaluate_load(&self.cluster.snapshots(), Instant::now());
        if recommendation != ScaleRecommendation::Maintain {
            debug!(recommendation = %recommendation, "Applying balancer recommendation");
        }
        self.cluster.apply_recommendation(recommendation);
    }

    // -------------------------------------------------------------------------
    // Crash recovery
    // -------------------------------------------------------------------------

    /// Re-submits jobs the durable store still shows in flight.
    ///
    /// Records from the recovery window are marked recovery-pending and fed
    /// through the normal admission path. This is at-least-once territory:
    /// a job that actually completed just before the crash may run again.
    async fn recover_from_store(&mut self) {
        let window = self.settings.health.recovery_window;
        let records = match self.store.query_pending_jobs(window).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Crash recovery query failed");
                return;
            }
        };
        if records.is_empty() {
            return;
        }

        info!(
            count = records.len(),
            window_secs = window.as_secs(),
            "Re-submitting jobs found in flight before restart"
        );

        let count = records.len();
        for record in records {
            self.persist(PersistOp::Update(
                record.id.clone(),
                JobUpdate::status(JobStatus::RecoveryPending),
            ));

            let mut job = Job::new(
                PayloadRef::new(record.payload_path.clone(), record.payload_size),
                record.owner_id.clone(),
                record.plan,
                record.tier,
            );
            job.id = record.id.clone();
            job.retry_count = record.retry_count;
            job.created_at = record.created_at;

            let (status_tx, _status_rx) = watch::channel(JobStatus::Queued);
            self.active.insert(
                job.id.clone(),
                ActiveJob {
                    job: job.clone(),
                    status_tx,
                    ticket: None,
                },
            );
            self.queue.enqueue(job);
        }

        self.events.emit(JobEvent::SystemRecovery {
            reason: format!("{} jobs re-submitted after restart", count),
        });
    }

    // -------------------------------------------------------------------------
    // Plumbing
    // -------------------------------------------------------------------------

    /// Spawns the single best-effort persistence writer.
    ///
    /// One consumer keeps store writes ordered per job; errors are logged
    /// and swallowed so persistence can never corrupt live scheduling.
    fn spawn_persistence_writer(&mut self) {
        let Some(mut persist_rx) = self.persist_rx.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            while let Some(op) = persist_rx.recv().await {
                let result = match op {
                    PersistOp::Create(record) => store.create_job_record(&record).await,
                    PersistOp::Update(id, update) => store.update_job_record(&id, update).await,
                };
                if let Err(e) = result {
                    warn!(error = %e, "Best-effort persistence failed");
                }
            }
        });
    }

    fn persist(&self, op: PersistOp) {
        let _ = self.persist_tx.send(op);
    }

    fn shutdown_all(&mut self) {
        info!("Coordinator shutting down");
        self.pool.shutdown();
        self.cluster.stop_all();
        self.queue.clear();
        // Dropping the coordinator drops status senders; handles observe
        // the closed channel and report the last status they saw.
    }

    fn stamp_activity(&self) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    fn update_pending_work(&self) {
        let pending = self.active.len() + self.queue.total_waiting();
        self.pending_work_count
            .store(pending as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("active_jobs", &self.active.len())
            .field("queue", &self.queue)
            .field("cluster", &self.cluster)
            .finish()
    }
}
