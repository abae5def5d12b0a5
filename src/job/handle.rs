//! Job handle for status queries.
//!
//! The [`JobHandle`] is returned when a job is submitted to the orchestrator.
//! It provides methods to query the job's status and wait for it to reach a
//! terminal state. Jobs have no user-triggered cancellation; execution is
//! only abandoned through the failure detection paths.
//!
//! # Example
//!
//! ```ignore
//! use docstream::job::JobStatus;
//!
//! let mut handle = service.submit_job(payload, "owner-1", Plan::Premium)?;
//!
//! // Check status without waiting
//! if handle.status() == JobStatus::Processing {
//!     println!("Job is running");
//! }
//!
//! // Wait for completion
//! let status = handle.wait().await;
//! ```

use super::id::JobId;
use super::status::JobStatus;
use tokio::sync::watch;

/// Handle to a submitted job for status queries.
///
/// This handle is cloneable and can be shared across tasks. All clones
/// refer to the same underlying job.
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    status_rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// Creates a new job handle.
    ///
    /// This is typically called by the service facade when a job is submitted.
    pub(crate) fn new(job_id: JobId, status_rx: watch::Receiver<JobStatus>) -> Self {
        Self { job_id, status_rx }
    }

    /// Returns the job's unique identifier.
    pub fn id(&self) -> &JobId {
        &self.job_id
    }

    /// Returns the current job status.
    ///
    /// This is a non-blocking operation that returns the most recent status.
    pub fn status(&self) -> JobStatus {
        *self.status_rx.borrow()
    }

    /// Waits for the job to reach a terminal state and returns it.
    ///
    /// Returns `Completed` or `PermanentlyFailed`. If the orchestrator shuts
    /// down before the job finishes, returns the last observed status.
    pub async fn wait(&mut self) -> JobStatus {
        loop {
            let current = self.status();
            if current.is_terminal() {
                return current;
            }
            if self.status_rx.changed().await.is_err() {
                // Coordinator dropped the sender; report what we last saw.
                return self.status();
            }
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_status() {
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let handle = JobHandle::new(JobId::new("test"), status_rx);

        assert_eq!(handle.status(), JobStatus::Queued);

        status_tx.send(JobStatus::Processing).unwrap();
        assert_eq!(handle.status(), JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_handle_wait_reaches_terminal() {
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let mut handle = JobHandle::new(JobId::new("test"), status_rx);

        tokio::spawn(async move {
            status_tx.send(JobStatus::Processing).unwrap();
            status_tx.send(JobStatus::Completed).unwrap();
        });

        assert_eq!(handle.wait().await, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_handle_wait_on_dropped_sender() {
        let (status_tx, status_rx) = watch::channel(JobStatus::Processing);
        let mut handle = JobHandle::new(JobId::new("test"), status_rx);

        drop(status_tx);
        // Non-terminal last status is still reported rather than hanging.
        assert_eq!(handle.wait().await, JobStatus::Processing);
    }

    #[test]
    fn test_handle_clone_shares_status() {
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let handle1 = JobHandle::new(JobId::new("test"), status_rx);
        let handle2 = handle1.clone();

        status_tx.send(JobStatus::Assigned).unwrap();
        assert_eq!(handle1.status(), JobStatus::Assigned);
        assert_eq!(handle2.status(), handle1.status());
    }
}
