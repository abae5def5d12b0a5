//! Job lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// Status transitions are driven by the queue (on dequeue), the assigned
/// worker (on start/finish), and the failure recovery manager (on retry or
/// escalation). `Failed` is a transient state: the job is awaiting a retry.
/// Only `Completed` and `PermanentlyFailed` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a tier backlog.
    #[default]
    Queued,

    /// Dequeued and bound to a worker, not yet executing.
    Assigned,

    /// Executing on a worker.
    Processing,

    /// Finished successfully.
    Completed,

    /// Failed; a retry is scheduled or pending.
    Failed,

    /// Retry budget exhausted; no further attempts will be made.
    PermanentlyFailed,

    /// Found in the durable store after a restart, awaiting re-submission.
    RecoveryPending,
}

impl JobStatus {
    /// Returns true if this is a terminal state (job is complete).
    ///
    /// Terminal states are: Completed, PermanentlyFailed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PermanentlyFailed)
    }

    /// Returns true if the job is still moving through the pipeline.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Assigned | Self::Processing | Self::Failed | Self::RecoveryPending
        )
    }

    /// Returns true if the job finished successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Assigned => write!(f, "assigned"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::PermanentlyFailed => write!(f, "permanently-failed"),
            Self::RecoveryPending => write!(f, "recovery-pending"),
        }
    }
}
