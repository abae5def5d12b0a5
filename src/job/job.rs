//! The job record and its submission inputs.

use super::id::JobId;
use super::status::JobStatus;
use crate::cluster::WorkerId;
use crate::queue::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caller plan, assigned by the billing layer upstream of this crate.
///
/// The plan maps to a tier unless the payload is large enough to route to
/// the large-file tier regardless of plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Paid plan, serviced by the premium tier.
    Premium,
    /// Default plan, serviced by the normal tier.
    Standard,
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premium => write!(f, "premium"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// Reference to a job's input document.
///
/// The payload itself lives outside this crate; the orchestrator only needs
/// its location and size (for tier and slot-class classification).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Path or handle to the document to convert.
    pub path: PathBuf,

    /// Payload size in bytes.
    pub size_bytes: u64,
}

impl PayloadRef {
    /// Creates a payload reference.
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

/// A unit of work: one document conversion request.
///
/// The coordinator owns the canonical `Job` value for every active job;
/// workers receive clones. Mutation happens only through the owning
/// components (queue on dequeue, cluster on assignment, recovery on
/// retry/escalation).
#[derive(Clone, Debug)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,

    /// Tier this job is serviced by, derived from plan and payload size.
    pub tier: Tier,

    /// Caller plan at submission time.
    pub plan: Plan,

    /// Input document reference.
    pub payload: PayloadRef,

    /// Identifier of the submitting caller, used for event routing.
    pub owner_id: String,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Number of retry attempts consumed so far.
    pub retry_count: u32,

    /// Set when the job re-enters its tier after a failure.
    pub is_retry: bool,

    /// Submission time.
    pub created_at: DateTime<Utc>,

    /// Time the first worker began executing this job.
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker currently (or last) bound to this job.
    pub assigned_worker: Option<WorkerId>,

    /// Timestamp of the first failure, retained for diagnostics across
    /// retries.
    pub first_failure_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new queued job.
    ///
    /// The tier is computed by the queue manager's classification rules;
    /// callers normally go through `QueueManager::enqueue` or the service
    /// facade rather than constructing jobs directly.
    pub fn new(payload: PayloadRef, owner_id: impl Into<String>, plan: Plan, tier: Tier) -> Self {
        Self {
            id: JobId::auto(),
            tier,
            plan,
            payload,
            owner_id: owner_id.into(),
            status: JobStatus::Queued,
            retry_count: 0,
            is_retry: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            assigned_worker: None,
            first_failure_at: None,
        }
    }

    /// Marks the job as bound to a worker.
    pub fn assign(&mut self, worker: WorkerId) {
        self.status = JobStatus::Assigned;
        self.assigned_worker = Some(worker);
    }

    /// Marks the job as executing.
    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Marks the job as terminally complete.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Records a failure, retaining the first failure time for diagnostics.
    pub fn record_failure(&mut self) {
        self.status = JobStatus::Failed;
        self.assigned_worker = None;
        if self.first_failure_at.is_none() {
            self.first_failure_at = Some(Utc::now());
        }
    }

    /// Marks the job permanently failed after retry exhaustion.
    pub fn escalate(&mut self) {
        self.status = JobStatus::PermanentlyFailed;
        self.completed_at = Some(Utc::now());
    }

    /// Resets the job for re-entry into its tier backlog.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.assigned_worker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            PayloadRef::new("/data/in/report.docx", 4_096),
            "owner-1",
            Plan::Standard,
            Tier::Normal,
        )
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = test_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(!job.is_retry);
        assert!(job.started_at.is_none());
        assert!(job.assigned_worker.is_none());
    }

    #[test]
    fn test_assign_and_start() {
        let mut job = test_job();
        let worker = WorkerId::new("worker-0");

        job.assign(worker.clone());
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.assigned_worker, Some(worker));

        job.start();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn test_start_preserves_first_start_time() {
        let mut job = test_job();
        job.start();
        let first = job.started_at;
        job.start();
        assert_eq!(job.started_at, first);
    }

    #[test]
    fn test_record_failure_keeps_first_failure_time() {
        let mut job = test_job();
        job.record_failure();
        let first = job.first_failure_at;
        assert!(first.is_some());

        job.requeue();
        job.record_failure();
        assert_eq!(job.first_failure_at, first);
    }

    #[test]
    fn test_requeue_clears_worker() {
        let mut job = test_job();
        job.assign(WorkerId::new("worker-3"));
        job.requeue();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.assigned_worker.is_none());
    }

    #[test]
    fn test_escalate_is_terminal() {
        let mut job = test_job();
        job.escalate();
        assert!(job.status.is_terminal());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_plan_display() {
        assert_eq!(format!("{}", Plan::Premium), "premium");
        assert_eq!(format!("{}", Plan::Standard), "standard");
    }
}
