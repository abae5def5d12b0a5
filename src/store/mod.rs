//! The durable job store boundary.
//!
//! The store is a secondary record, not the source of truth for live
//! scheduling: persistence failures are logged and swallowed so they can
//! never block or corrupt in-memory job progress. Its one load-bearing role
//! is crash recovery, via [`JobStore::query_pending_jobs`].

mod memory;
mod record;

pub use memory::MemoryJobStore;
pub use record::{JobRecord, JobUpdate};

use crate::job::JobId;
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Error returned by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No record exists for the given job.
    #[error("no record for job {0}")]
    NotFound(JobId),

    /// Record serialization failed.
    #[error("record serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Narrow create/update/query contract over the durable job store.
pub trait JobStore: Send + Sync {
    /// Persists a new job record.
    fn create_job_record<'a>(&'a self, record: &'a JobRecord)
        -> BoxFuture<'a, Result<(), StoreError>>;

    /// Applies a partial update to an existing record.
    fn update_job_record<'a>(
        &'a self,
        id: &'a JobId,
        update: JobUpdate,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Returns records still marked queued/assigned/processing whose last
    /// update falls within `window` of now. Used for crash recovery.
    fn query_pending_jobs(&self, window: Duration) -> BoxFuture<'_, Result<Vec<JobRecord>, StoreError>>;
}

/// Store that discards everything (for embedders without persistence).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJobStore;

impl JobStore for NullJobStore {
    fn create_job_record<'a>(
        &'a self,
        _record: &'a JobRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn update_job_record<'a>(
        &'a self,
        _id: &'a JobId,
        _update: JobUpdate,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn query_pending_jobs(
        &self,
        _window: Duration,
    ) -> BoxFuture<'_, Result<Vec<JobRecord>, StoreError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
