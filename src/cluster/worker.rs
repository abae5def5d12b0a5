//! Worker identity, state machine, and runtime task.

use crate::breaker::{CircuitBreaker, CircuitError};
use crate::extract::{ExtractOutput, Extractor};
use crate::job::{Job, JobId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Capacity of each worker's assignment channel.
pub const DEFAULT_ASSIGNMENT_CHANNEL_CAPACITY: usize = 16;

/// Global counter for generating unique worker IDs.
static WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a worker.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a worker ID with the given string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a unique auto-generated worker ID (`worker-{counter}`).
    pub fn auto() -> Self {
        let counter = WORKER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("worker-{}", counter))
    }

    /// Returns the string value of this worker ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle status.
///
/// Transitions: `Starting → Idle ⇄ Processing → (Stopping | Error)`, then
/// `Stopped`. Only the cluster manager mutates status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Being spawned; not yet assignable.
    Starting,
    /// Ready for work.
    Idle,
    /// Executing at least one job.
    Processing,
    /// Draining for graceful retirement.
    Stopping,
    /// Failed (stale heartbeat or runtime error); being replaced.
    Error,
    /// Fully stopped; about to leave the table.
    Stopped,
}

impl WorkerStatus {
    /// Returns true if the worker counts toward active capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Idle | Self::Processing)
    }

    /// Returns a string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rolling performance statistics for one worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerStats {
    /// Jobs completed successfully.
    pub completed: u64,
    /// Jobs that failed on this worker.
    pub failed: u64,
    /// Total processing time across completed jobs, in milliseconds.
    pub total_processing_ms: u64,
    /// When the last failure happened, if ever.
    pub last_error_at: Option<Instant>,
}

impl WorkerStats {
    /// Average processing time across completed jobs, in milliseconds.
    pub fn avg_processing_ms(&self) -> u64 {
        if self.completed == 0 {
            0
        } else {
            self.total_processing_ms / self.completed
        }
    }

    /// Records a successful job.
    pub fn record_success(&mut self, duration: Duration) {
        self.completed += 1;
        self.total_processing_ms += duration.as_millis() as u64;
    }

    /// Records a failed job.
    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.last_error_at = Some(Instant::now());
    }
}

/// A job handed to a worker.
#[derive(Debug)]
pub struct Assignment {
    /// Clone of the coordinator's canonical job.
    pub job: Job,
}

/// Outcome of one job execution on a worker.
#[derive(Debug)]
pub enum JobOutcome {
    /// Extraction succeeded.
    Completed(ExtractOutput),
    /// Extraction failed (transient; routed through the retry path).
    Failed(String),
    /// The hard job timeout elapsed; treated as worker-failure-equivalent.
    TimedOut,
    /// The circuit breaker rejected the call without invoking the engine.
    /// Does not consume a retry attempt.
    CircuitRejected(String),
}

impl JobOutcome {
    /// Returns true for outcomes that count as worker-side success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Events workers report back to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A job finished (in any way) on a worker.
    JobFinished {
        /// Reporting worker.
        worker_id: WorkerId,
        /// The finished job.
        job_id: JobId,
        /// How it finished.
        outcome: JobOutcome,
        /// Wall-clock execution time.
        duration: Duration,
    },
    /// A worker's run loop exited.
    Stopped {
        /// The stopped worker.
        worker_id: WorkerId,
    },
}

/// The worker's runtime task.
///
/// Pulls assignments, stamps heartbeats into the shared table, and executes
/// each job in a spawned subtask so a slow extraction never blocks the
/// heartbeat loop.
pub struct WorkerRuntime {
    id: WorkerId,
    assign_rx: mpsc::Receiver<Assignment>,
    heartbeats: Arc<DashMap<WorkerId, Instant>>,
    extractor: Arc<dyn Extractor>,
    breaker: Arc<CircuitBreaker>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    heartbeat_interval: Duration,
    job_timeout: Duration,
}

impl WorkerRuntime {
    /// Creates a worker runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        assign_rx: mpsc::Receiver<Assignment>,
        heartbeats: Arc<DashMap<WorkerId, Instant>>,
        extractor: Arc<dyn Extractor>,
        breaker: Arc<CircuitBreaker>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        heartbeat_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            id,
            assign_rx,
            heartbeats,
            extractor,
            breaker,
            events_tx,
            heartbeat_interval,
            job_timeout,
        }
    }

    /// Runs the worker until cancelled or its assignment channel closes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.heartbeats.insert(self.id.clone(), Instant::now());
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(worker_id = %self.id, "Worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = heartbeat.tick() => {
                    self.heartbeats.insert(self.id.clone(), Instant::now());
                }

                assignment = self.assign_rx.recv() => {
                    match assignment {
                        Some(assignment) => self.spawn_execution(assignment),
                        None => break,
                    }
                }
            }
        }

        self.heartbeats.remove(&self.id);
        let _ = self.events_tx.send(WorkerEvent::Stopped {
            worker_id: self.id.clone(),
        });
        info!(worker_id = %self.id, "Worker stopped");
    }

    fn spawn_execution(&self, assignment: Assignment) {
        let worker_id = self.id.clone();
        let extractor = Arc::clone(&self.extractor);
        let breaker = Arc::clone(&self.breaker);
        let events_tx = self.events_tx.clone();
        let job_timeout = self.job_timeout;

        tokio::spawn(async move {
            let job = assignment.job;
            let payload = job.payload.clone();
            let start = Instant::now();

            debug!(worker_id = %worker_id, job_id = %job.id, "Job execution started");

            let result = tokio::time::timeout(
                job_timeout,
                breaker.call(|| extractor.extract(&payload)),
            )
            .await;

            let outcome = match result {
                Err(_) => JobOutcome::TimedOut,
                Ok(Ok(output)) => JobOutcome::Completed(output),
                Ok(Err(err @ CircuitError::Open { .. })) => {
                    JobOutcome::CircuitRejected(err.to_string())
                }
                Ok(Err(err @ CircuitError::ProbeLimit)) => {
                    JobOutcome::CircuitRejected(err.to_string())
                }
                Ok(Err(CircuitError::Inner(err))) => JobOutcome::Failed(err.to_string()),
            };

            let _ = events_tx.send(WorkerEvent::JobFinished {
                worker_id,
                job_id: job.id,
                outcome,
                duration: start.elapsed(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use crate::job::{PayloadRef, Plan};
    use crate::queue::Tier;
    use futures::future::BoxFuture;

    struct StubExtractor {
        fail: bool,
    }

    impl Extractor for StubExtractor {
        fn extract<'a>(
            &'a self,
            payload: &'a PayloadRef,
        ) -> BoxFuture<'a, Result<ExtractOutput, ExtractError>> {
            Box::pin(async move {
                if self.fail {
                    Err(ExtractError::Engine("stub failure".to_string()))
                } else {
                    Ok(ExtractOutput {
                        result_path: payload.path.with_extension("out"),
                        bytes: payload.size_bytes,
                    })
                }
            })
        }
    }

    fn job(name: &str) -> Job {
        let mut j = Job::new(
            PayloadRef::new("/data/in/doc.pdf", 512),
            "owner",
            Plan::Standard,
            Tier::Normal,
        );
        j.id = JobId::new(name);
        j
    }

    fn runtime(
        fail: bool,
    ) -> (
        WorkerRuntime,
        mpsc::Sender<Assignment>,
        mpsc::UnboundedReceiver<WorkerEvent>,
        Arc<DashMap<WorkerId, Instant>>,
    ) {
        let (assign_tx, assign_rx) = mpsc::channel(DEFAULT_ASSIGNMENT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let heartbeats = Arc::new(DashMap::new());
        let runtime = WorkerRuntime::new(
            WorkerId::new("worker-test"),
            assign_rx,
            Arc::clone(&heartbeats),
            Arc::new(StubExtractor { fail }),
            Arc::new(CircuitBreaker::with_defaults()),
            events_tx,
            Duration::from_millis(20),
            Duration::from_secs(5),
        );
        (runtime, assign_tx, events_rx, heartbeats)
    }

    #[tokio::test]
    async fn test_worker_completes_job() {
        let (runtime, assign_tx, mut events_rx, _hb) = runtime(false);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runtime.run(shutdown.clone()));

        assign_tx
            .send(Assignment { job: job("j1") })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WorkerEvent::JobFinished {
                job_id, outcome, ..
            } => {
                assert_eq!(job_id.as_str(), "j1");
                assert!(outcome.is_success());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_worker_reports_failure() {
        let (runtime, assign_tx, mut events_rx, _hb) = runtime(true);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runtime.run(shutdown.clone()));

        assign_tx
            .send(Assignment { job: job("j1") })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WorkerEvent::JobFinished { outcome, .. } => {
                assert!(matches!(outcome, JobOutcome::Failed(_)));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_worker_stamps_heartbeats() {
        let (runtime, _assign_tx, _events_rx, heartbeats) = runtime(false);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runtime.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stamped = heartbeats.get(&WorkerId::new("worker-test")).map(|e| *e);
        assert!(stamped.is_some());
        assert!(stamped.unwrap().elapsed() < Duration::from_millis(100));

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_worker_reports_stopped_on_shutdown() {
        let (runtime, _assign_tx, mut events_rx, heartbeats) = runtime(false);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runtime.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        let _ = handle.await;

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, WorkerEvent::Stopped { .. }));
        assert!(heartbeats.get(&WorkerId::new("worker-test")).is_none());
    }

    #[test]
    fn test_worker_stats_average() {
        let mut stats = WorkerStats::default();
        assert_eq!(stats.avg_processing_ms(), 0);

        stats.record_success(Duration::from_millis(100));
        stats.record_success(Duration::from_millis(300));
        assert_eq!(stats.avg_processing_ms(), 200);
        assert_eq!(stats.completed, 2);

        stats.record_failure();
        assert_eq!(stats.failed, 1);
        assert!(stats.last_error_at.is_some());
    }

    #[test]
    fn test_status_is_active() {
        assert!(WorkerStatus::Idle.is_active());
        assert!(WorkerStatus::Processing.is_active());
        assert!(!WorkerStatus::Starting.is_active());
        assert!(!WorkerStatus::Error.is_active());
        assert!(!WorkerStatus::Stopped.is_active());
    }

    #[test]
    fn test_worker_id_auto_unique() {
        assert_ne!(WorkerId::auto(), WorkerId::auto());
    }
}
