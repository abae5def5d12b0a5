//! Unique job identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique job IDs.
static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a job.
///
/// Job IDs are strings that uniquely identify a job instance. They can be
/// generated automatically or constructed from meaningful data (like the
/// durable store's record key during crash recovery).
///
/// # Example
///
/// ```ignore
/// use docstream::job::JobId;
///
/// // Auto-generated unique ID
/// let id = JobId::auto();
///
/// // ID from meaningful data
/// let id = JobId::new("doc-4f1a-0017");
/// ```
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new job ID with the given string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a unique auto-generated job ID.
    ///
    /// The ID format is `job-{counter}` where counter is a monotonically
    /// increasing number.
    pub fn auto() -> Self {
        let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("job-{}", counter))
    }

    /// Returns the string value of this job ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_new() {
        let id = JobId::new("test-job");
        assert_eq!(id.as_str(), "test-job");
    }

    #[test]
    fn test_job_id_auto() {
        let id1 = JobId::auto();
        let id2 = JobId::auto();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("job-"));
    }

    #[test]
    fn test_job_id_equality() {
        let id1 = JobId::new("test");
        let id2 = JobId::new("test");
        let id3 = JobId::new("other");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("my-job-123");
        assert_eq!(format!("{}", id), "my-job-123");
    }

    #[test]
    fn test_job_id_from_string() {
        let id: JobId = String::from("from-string").into();
        assert_eq!(id.as_str(), "from-string");
    }
}
