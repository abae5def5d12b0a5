//! High-level facade for the orchestration core.
//!
//! [`Orchestrator`] wires every component together; [`DocService`] is the
//! cheap, cloneable handle other parts of the system use to submit jobs and
//! read health.
//!
//! # Example
//!
//! ```ignore
//! use docstream::config::Settings;
//! use docstream::job::{PayloadRef, Plan};
//! use docstream::service::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(Settings::default(), extractor, store, events)?;
//! let service = orchestrator.service();
//!
//! tokio::spawn(orchestrator.run(shutdown_token));
//!
//! let mut handle = service.submit_job(
//!     PayloadRef::new("/uploads/report.docx", 48_213),
//!     "owner-17",
//!     Plan::Premium,
//! )?;
//! let status = handle.wait().await;
//! ```

use crate::balancer::{LoadBalancer, Strategy};
use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::cluster::{ClusterGauges, ClusterHealth, ClusterManager};
use crate::config::Settings;
use crate::events::EventSink;
use crate::extract::Extractor;
use crate::job::{Job, JobHandle, JobStatus, PayloadRef, Plan};
use crate::memory::MemoryMonitor;
use crate::pool::{PoolConfig, ResourcePool};
use crate::queue::{classify, QueueCounters, QueueManager, QueueStats};
use crate::recovery::{
    FailureRecoveryManager, RecoveryCoordinator, RecoveryGauges, StallWatchdog, SubmittedJob,
};
use crate::store::JobStore;
use dashmap::DashMap;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capacity of the submission channel.
pub const DEFAULT_SUBMIT_CHANNEL_CAPACITY: usize = 256;

/// Error returned by [`DocService::submit_job`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The orchestrator is no longer running.
    #[error("orchestrator is shut down")]
    ShutDown,

    /// The submission channel is full; retry later.
    #[error("submission queue is full")]
    Backlogged,

    /// The payload has no content to convert.
    #[error("payload is empty")]
    EmptyPayload,
}

/// Recovery statistics combined with the circuit breaker state.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryReport {
    /// Workers flagged failed since startup.
    pub failed_workers: u64,
    /// Jobs currently tracked as in flight.
    pub active_jobs: usize,
    /// Retries scheduled since startup.
    pub retries_scheduled: u64,
    /// Jobs escalated to permanent failure since startup.
    pub permanent_failures: u64,
    /// Current extraction circuit breaker state.
    pub circuit_breaker: CircuitState,
}

/// Cloneable handle for submitting jobs and reading orchestrator health.
#[derive(Clone)]
pub struct DocService {
    submit_tx: mpsc::Sender<SubmittedJob>,
    queue_counters: Arc<QueueCounters>,
    cluster_gauges: Arc<ClusterGauges>,
    recovery_gauges: Arc<RecoveryGauges>,
    breaker: Arc<CircuitBreaker>,
    large_threshold_bytes: u64,
}

impl DocService {
    /// Submits a document conversion job.
    ///
    /// Classifies the job into a tier (payload size first, then plan) and
    /// hands it to the coordinator. Returns a handle for observing the
    /// job's lifecycle.
    pub fn submit_job(
        &self,
        payload: PayloadRef,
        owner_id: &str,
        plan: Plan,
    ) -> Result<JobHandle, SubmitError> {
        if payload.size_bytes == 0 {
            return Err(SubmitError::EmptyPayload);
        }

        let tier = classify(plan, payload.size_bytes, self.large_threshold_bytes);
        let job = Job::new(payload, owner_id, plan, tier);
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let handle = JobHandle::new(job.id.clone(), status_rx);

        match self.submit_tx.try_send(SubmittedJob { job, status_tx }) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::Backlogged),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::ShutDown),
        }
    }

    /// Per-tier waiting/active/completed/failed counts.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue_counters.snapshot()
    }

    /// Worker pool health.
    pub fn cluster_health(&self) -> ClusterHealth {
        self.cluster_gauges.health()
    }

    /// Failure recovery statistics and circuit breaker state.
    pub fn recovery_stats(&self) -> RecoveryReport {
        let stats = self.recovery_gauges.stats();
        RecoveryReport {
            failed_workers: stats.failed_workers,
            active_jobs: stats.active_jobs,
            retries_scheduled: stats.retries_scheduled,
            permanent_failures: stats.permanent_failures,
            circuit_breaker: self.breaker.state(),
        }
    }
}

impl std::fmt::Debug for DocService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocService")
            .field("queue", &self.queue_stats())
            .field("cluster", &self.cluster_health())
            .finish()
    }
}

/// Fully wired orchestration core.
///
/// Construction wires the components; [`run`](Self::run) spawns the
/// background daemons (memory monitor, pool pressure watcher, stall
/// watchdog) and drives the coordinator loop until shutdown.
pub struct Orchestrator {
    coordinator: RecoveryCoordinator,
    monitor: MemoryMonitor,
    pool: Arc<ResourcePool>,
    service: DocService,
}

impl Orchestrator {
    /// Builds the orchestration core.
    ///
    /// Fails only if the configured scratch root cannot be created.
    pub fn new(
        settings: Settings,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
    ) -> io::Result<Self> {
        let pool = Arc::new(ResourcePool::new(PoolConfig::from(&settings.pool))?);
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::from(&settings.breaker)));
        let heartbeats = Arc::new(DashMap::new());
        let queue_counters = Arc::new(QueueCounters::new());
        let cluster_gauges = Arc::new(ClusterGauges::new());
        let recovery_gauges = Arc::new(RecoveryGauges::new());

        let (submit_tx, submit_rx) = mpsc::channel(DEFAULT_SUBMIT_CHANNEL_CAPACITY);
        let (worker_events_tx, worker_events_rx) = mpsc::unbounded_channel();

        let monitor = MemoryMonitor::new(
            settings.memory.max_memory_usage_mb,
            settings.memory.sample_interval,
            Arc::clone(&events),
        );

        let queue = QueueManager::new(
            settings.pool.large_file_threshold_bytes(),
            Arc::clone(&queue_counters),
            Arc::clone(&events),
        );

        let cluster = ClusterManager::new(
            settings.cluster.clone(),
            settings.health.clone(),
            extractor,
            Arc::clone(&breaker),
            worker_events_tx,
            Arc::clone(&heartbeats),
            Arc::clone(&cluster_gauges),
            CancellationToken::new(),
        );

        let recovery = FailureRecoveryManager::new(
            settings.retry.clone(),
            settings.health.clone(),
            heartbeats,
            Arc::clone(&recovery_gauges),
        );

        let service = DocService {
            submit_tx,
            queue_counters,
            cluster_gauges,
            recovery_gauges,
            breaker: Arc::clone(&breaker),
            large_threshold_bytes: settings.pool.large_file_threshold_bytes(),
        };

        let coordinator = RecoveryCoordinator::new(
            settings,
            queue,
            cluster,
            LoadBalancer::default(),
            recovery,
            Arc::clone(&pool),
            store,
            events,
            breaker,
            submit_rx,
            worker_events_rx,
        );

        Ok(Self {
            coordinator,
            monitor,
            pool,
            service,
        })
    }

    /// Overrides the load balancing strategy (default: weighted round
    /// robin).
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.coordinator.set_strategy(strategy);
        self
    }

    /// Returns a cloneable service handle.
    ///
    /// Call before [`run`](Self::run); the handle stays valid for the
    /// orchestrator's lifetime.
    pub fn service(&self) -> DocService {
        self.service.clone()
    }

    /// Runs the orchestrator until shutdown is signalled.
    ///
    /// Spawns the memory monitor, the pool's pressure watcher, and the
    /// stall watchdog, then drives the coordinator loop.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(version = crate::VERSION, "Orchestrator starting");

        let (last_activity, pending_work) = self.coordinator.activity_tracking();
        tokio::spawn(StallWatchdog::new(last_activity, pending_work).run(shutdown.clone()));

        let memory_rx = self.monitor.subscribe();
        tokio::spawn(self.monitor.run(shutdown.clone()));
        tokio::spawn(Arc::clone(&self.pool).watch_memory(memory_rx, shutdown.clone()));

        self.coordinator.run(shutdown).await;
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
