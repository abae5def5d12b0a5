//! In-memory job store.
//!
//! Used by tests and by embedders that want orchestration without external
//! persistence. Also counts terminal-status writes per record, which the
//! crash-recovery tests lean on to prove a job reaches a terminal state
//! exactly once.

use super::record::{JobRecord, JobUpdate};
use super::{JobStore, StoreError};
use crate::job::JobId;
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    records: HashMap<JobId, JobRecord>,
    terminal_writes: HashMap<JobId, u32>,
}

/// Hash-map-backed job store.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly (test setup for crash recovery).
    pub fn insert(&self, record: JobRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Returns a copy of one record.
    pub fn record(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().records.get(id).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// How many times a terminal status was written for one record.
    pub fn terminal_writes(&self, id: &JobId) -> u32 {
        self.lock().terminal_writes.get(id).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobStore for MemoryJobStore {
    fn create_job_record<'a>(
        &'a self,
        record: &'a JobRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.lock().records.insert(record.id.clone(), record.clone());
            Ok(())
        })
    }

    fn update_job_record<'a>(
        &'a self,
        id: &'a JobId,
        update: JobUpdate,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let is_terminal = update
                .status
                .map(|status| status.is_terminal())
                .unwrap_or(false);
            let record = inner
                .records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            update.apply(record);
            if is_terminal {
                *inner.terminal_writes.entry(id.clone()).or_insert(0) += 1;
            }
            Ok(())
        })
    }

    fn query_pending_jobs(
        &self,
        window: Duration,
    ) -> BoxFuture<'_, Result<Vec<JobRecord>, StoreError>> {
        Box::pin(async move {
            let cutoff = Utc::now()
                - chrono::Duration::from_std(window)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
            let inner = self.lock();
            Ok(inner
                .records
                .values()
                .filter(|r| r.is_pending() && r.updated_at >= cutoff)
                .cloned()
                .collect())
        })
    }
}

impl std::fmt::Debug for MemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobStore")
            .field("records", &self.len())
            .finish()
    }
}
