//! Persisted job record and partial update.

use crate::job::{Job, JobId, JobStatus, Plan};
use crate::queue::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One job as persisted in the durable store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier (the store's record key).
    pub id: JobId,

    /// Submitting caller.
    pub owner_id: String,

    /// Caller plan at submission time.
    pub plan: Plan,

    /// Tier the job was classified into.
    pub tier: Tier,

    /// Lifecycle status at last update.
    pub status: JobStatus,

    /// Payload location.
    pub payload_path: PathBuf,

    /// Payload size in bytes.
    pub payload_size: u64,

    /// Retry attempts consumed.
    pub retry_count: u32,

    /// Terminal failure reason, if permanently failed.
    pub failure_reason: Option<String>,

    /// Submission time.
    pub created_at: DateTime<Utc>,

    /// Last persisted update.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Builds a record from an in-memory job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            plan: job.plan,
            tier: job.tier,
            status: job.status,
            payload_path: job.payload.path.clone(),
            payload_size: job.payload.size_bytes,
            retry_count: job.retry_count,
            failure_reason: None,
            created_at: job.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the record represents unfinished work.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Queued | JobStatus::Assigned | JobStatus::Processing
        )
    }
}

/// Partial update applied to a persisted record.
///
/// Unset fields leave the stored value untouched.
#[derive(Clone, Debug, Default)]
pub struct JobUpdate {
    /// New lifecycle status.
    pub status: Option<JobStatus>,

    /// New retry count.
    pub retry_count: Option<u32>,

    /// Terminal failure reason.
    pub failure_reason: Option<String>,
}

impl JobUpdate {
    /// Update that only changes the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Update for a scheduled retry.
    pub fn retrying(retry_count: u32) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            retry_count: Some(retry_count),
            failure_reason: None,
        }
    }

    /// Update for a permanent failure.
    pub fn permanently_failed(retry_count: u32, reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::PermanentlyFailed),
            retry_count: Some(retry_count),
            failure_reason: Some(reason.into()),
        }
    }

    /// Applies this update to a record, stamping `updated_at`.
    pub fn apply(self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(reason) = self.failure_reason {
            record.failure_reason = Some(reason);
        }
        record.updated_at = Utc::now();
    }
}
