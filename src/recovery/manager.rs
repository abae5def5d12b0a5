//! The failure recovery manager.

use super::backoff::{jittered, retry_delay};
use super::delay_queue::DelayQueue;
use crate::cluster::WorkerId;
use crate::config::{HealthSettings, RetrySettings};
use crate::job::{Job, JobId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Point-in-time recovery statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Workers flagged failed since startup.
    pub failed_workers: u64,
    /// Jobs currently tracked as in flight.
    pub active_jobs: usize,
    /// Retries scheduled since startup.
    pub retries_scheduled: u64,
    /// Jobs escalated to permanent failure since startup.
    pub permanent_failures: u64,
}

/// Shared atomic recovery gauges, written by the manager and read by the
/// service facade.
#[derive(Default)]
pub struct RecoveryGauges {
    failed_workers: AtomicU64,
    active_jobs: AtomicUsize,
    retries_scheduled: AtomicU64,
    permanent_failures: AtomicU64,
}

impl RecoveryGauges {
    /// Creates zeroed gauges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            failed_workers: self.failed_workers.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
        }
    }
}

/// How a job failure was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    /// A retry was scheduled after a backoff delay.
    RetryScheduled {
        /// Attempt number just consumed (1-based).
        attempt: u32,
        /// Backoff delay before re-enqueueing.
        delay: Duration,
    },
    /// The retry budget is exhausted; the job is terminally failed.
    PermanentlyFailed,
}

/// A worker flagged as failed by the health check.
#[derive(Clone, Debug)]
pub struct WorkerFailure {
    /// The failed worker.
    pub worker_id: WorkerId,
    /// Why it was flagged.
    pub reason: String,
    /// Jobs that were in flight on it.
    pub jobs: Vec<JobId>,
}

/// A job waiting out its backoff delay.
#[derive(Debug)]
pub struct PendingRetry {
    /// The job to re-enqueue (retry counters already updated).
    pub job: Job,
    /// The failure that caused this retry, for diagnostics.
    pub reason: String,
}

/// Outcome of one clock tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Retries whose backoff delay has elapsed.
    pub due_retries: Vec<PendingRetry>,
    /// True when the periodic health check should run now.
    pub run_health_check: bool,
}

struct InFlight {
    worker_id: WorkerId,
    started_at: Instant,
    last_progress: Instant,
}

/// Tracks in-flight jobs and worker heartbeats; computes retry eligibility
/// and backoff; flags failed workers.
///
/// Owns the single delay queue that all backoff timers share, and the clock
/// bookkeeping for the periodic health check.
pub struct FailureRecoveryManager {
    retry: RetrySettings,
    health: HealthSettings,
    heartbeats: Arc<DashMap<WorkerId, Instant>>,
    in_flight: HashMap<JobId, InFlight>,
    delay: DelayQueue<PendingRetry>,
    gauges: Arc<RecoveryGauges>,
    last_health_check: Instant,
}

impl FailureRecoveryManager {
    /// Creates a recovery manager.
    pub fn new(
        retry: RetrySettings,
        health: HealthSettings,
        heartbeats: Arc<DashMap<WorkerId, Instant>>,
        gauges: Arc<RecoveryGauges>,
    ) -> Self {
        Self {
            retry,
            health,
            heartbeats,
            in_flight: HashMap::new(),
            delay: DelayQueue::new(),
            gauges,
            last_health_check: Instant::now(),
        }
    }

    /// Records a job starting on a worker.
    pub fn job_assigned(&mut self, job_id: JobId, worker_id: WorkerId) {
        let now = Instant::now();
        self.in_flight.insert(
            job_id,
            InFlight {
                worker_id,
                started_at: now,
                last_progress: now,
            },
        );
        self.gauges
            .active_jobs
            .store(self.in_flight.len(), Ordering::Relaxed);
    }

    /// Records progress on an in-flight job.
    pub fn job_progress(&mut self, job_id: &JobId) {
        if let Some(entry) = self.in_flight.get_mut(job_id) {
            entry.last_progress = Instant::now();
        }
    }

    /// Stops tracking a finished job.
    pub fn job_finished(&mut self, job_id: &JobId) {
        self.in_flight.remove(job_id);
        self.gauges
            .active_jobs
            .store(self.in_flight.len(), Ordering::Relaxed);
    }

    /// Resolves a job failure: schedule a retry or escalate.
    ///
    /// Mutates the job in place: on retry, increments the retry count,
    /// marks the retry flag, and records the failure time; on exhaustion,
    /// escalates to permanently failed.
    pub fn handle_job_failure(&mut self, job: &mut Job, reason: &str) -> FailureDisposition {
        self.job_finished(&job.id);

        if job.retry_count < self.retry.max_retries {
            job.retry_count += 1;
            job.is_retry = true;
            job.record_failure();

            let base = retry_delay(job.retry_count, self.retry.base_delay, self.retry.max_delay);
            let delay = jittered(base, self.retry.max_delay);

            debug!(
                job_id = %job.id,
                attempt = job.retry_count,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = reason,
                "Retry scheduled"
            );

            self.delay.schedule(
                PendingRetry {
                    job: job.clone(),
                    reason: reason.to_string(),
                },
                delay,
            );
            self.gauges.retries_scheduled.fetch_add(1, Ordering::Relaxed);

            FailureDisposition::RetryScheduled {
                attempt: job.retry_count,
                delay,
            }
        } else {
            job.escalate();
            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                reason = reason,
                "Job permanently failed"
            );
            self.gauges
                .permanent_failures
                .fetch_add(1, Ordering::Relaxed);
            FailureDisposition::PermanentlyFailed
        }
    }

    /// Schedules a re-enqueue without consuming a retry attempt.
    ///
    /// Used for circuit-open rejections: the dependency was never invoked,
    /// so the failure doesn't count against the job's budget.
    pub fn schedule_requeue(&mut self, job: Job, delay: Duration, reason: &str) {
        self.job_finished(&job.id);
        debug!(
            job_id = %job.id,
            delay_ms = delay.as_millis() as u64,
            reason = reason,
            "Requeue scheduled without retry charge"
        );
        self.delay.schedule(
            PendingRetry {
                job,
                reason: reason.to_string(),
            },
            delay,
        );
    }

    /// Advances the shared clock.
    ///
    /// Returns retries whose backoff has elapsed and whether the periodic
    /// health check is due.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        let due_retries = self.delay.drain_due(now);
        let run_health_check =
            now.duration_since(self.last_health_check) >= self.health.worker_health_check_interval;
        if run_health_check {
            self.last_health_check = now;
        }
        TickOutcome {
            due_retries,
            run_health_check,
        }
    }

    /// Flags workers with stale heartbeats or timed-out jobs.
    ///
    /// Each flagged worker's heartbeat entry is removed so it is reported
    /// once; its in-flight jobs are returned for the failure path and
    /// dropped from tracking.
    pub fn check_worker_health(&mut self, now: Instant) -> Vec<WorkerFailure> {
        let mut failures: HashMap<WorkerId, String> = HashMap::new();

        for entry in self.heartbeats.iter() {
            let silence = now.saturating_duration_since(*entry.value());
            if silence > self.health.heartbeat_stale_after {
                failures.insert(
                    entry.key().clone(),
                    format!("heartbeat silent for {}ms", silence.as_millis()),
                );
            }
        }

        for (job_id, in_flight) in &self.in_flight {
            let runtime = now.saturating_duration_since(in_flight.started_at);
            if runtime > self.health.job_timeout {
                let stalled = now.saturating_duration_since(in_flight.last_progress);
                failures.entry(in_flight.worker_id.clone()).or_insert_with(|| {
                    format!(
                        "job {} exceeded hard timeout ({}ms, no progress for {}ms)",
                        job_id,
                        runtime.as_millis(),
                        stalled.as_millis()
                    )
                });
            }
        }

        failures
            .into_iter()
            .map(|(worker_id, reason)| {
                self.heartbeats.remove(&worker_id);
                let jobs: Vec<JobId> = self
                    .in_flight
                    .iter()
                    .filter(|(_, f)| f.worker_id == worker_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                for job_id in &jobs {
                    self.in_flight.remove(job_id);
                }
                self.gauges
                    .active_jobs
                    .store(self.in_flight.len(), Ordering::Relaxed);
                self.gauges.failed_workers.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id = %worker_id, reason = %reason, jobs = jobs.len(), "Worker flagged failed");
                WorkerFailure {
                    worker_id,
                    reason,
                    jobs,
                }
            })
            .collect()
    }

    /// Jobs currently tracked as in flight.
    pub fn tracked_jobs(&self) -> usize {
        self.in_flight.len()
    }

    /// Retries still waiting out their backoff.
    pub fn pending_retries(&self) -> usize {
        self.delay.len()
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> RecoveryStats {
        self.gauges.stats()
    }
}

impl std::fmt::Debug for FailureRecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureRecoveryManager")
            .field("in_flight", &self.in_flight.len())
            .field("pending_retries", &self.delay.len())
            .finish()
    }
}
