//! Per-job scratch space with delayed cleanup.
//!
//! Jobs get a scratch directory under a common root for intermediate
//! conversion artifacts. The directory is removed when the job's slot is
//! released; a background sweep additionally reclaims directories that are
//! older than a fixed age or belong to jobs no longer active, covering
//! releases that never happened.

use crate::job::JobId;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default maximum age of a scratch directory before the sweep reclaims it.
pub const DEFAULT_SCRATCH_MAX_AGE_SECS: u64 = 3_600;

struct ScratchEntry {
    path: PathBuf,
    created: Instant,
}

/// Tracks and reclaims per-job scratch directories.
pub struct ScratchSpace {
    root: PathBuf,
    max_age: Duration,
    registered: Mutex<HashMap<JobId, ScratchEntry>>,
}

impl ScratchSpace {
    /// Creates a scratch space rooted at `root`, creating the directory if
    /// needed.
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_age,
            registered: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the scratch root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a scratch directory for a job.
    pub fn allocate(&self, job_id: &JobId) -> io::Result<PathBuf> {
        let path = self.root.join(job_id.as_str());
        std::fs::create_dir_all(&path)?;
        self.lock().insert(
            job_id.clone(),
            ScratchEntry {
                path: path.clone(),
                created: Instant::now(),
            },
        );
        debug!(job_id = %job_id, path = %path.display(), "Scratch allocated");
        Ok(path)
    }

    /// Removes a job's scratch directory.
    ///
    /// Best-effort: removal failures are logged and the entry is dropped
    /// either way (the background sweep is the backstop).
    pub fn cleanup(&self, job_id: &JobId) {
        let entry = self.lock().remove(job_id);
        if let Some(entry) = entry {
            if let Err(e) = std::fs::remove_dir_all(&entry.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        job_id = %job_id,
                        path = %entry.path.display(),
                        error = %e,
                        "Scratch cleanup failed"
                    );
                }
            }
        }
    }

    /// Reclaims stale scratch directories.
    ///
    /// Removes registered directories that are older than the maximum age or
    /// whose job is no longer in `active`, then scans the root for orphan
    /// directories nothing registered (left over from missed releases or a
    /// previous process) and removes those past the age limit too.
    ///
    /// Returns the number of directories removed.
    pub fn sweep(&self, active: &HashSet<JobId>) -> usize {
        let mut removed = 0;

        let stale: Vec<(JobId, PathBuf)> = {
            let registered = self.lock();
            registered
                .iter()
                .filter(|(job_id, entry)| {
                    entry.created.elapsed() > self.max_age || !active.contains(job_id)
                })
                .map(|(job_id, entry)| (job_id.clone(), entry.path.clone()))
                .collect()
        };

        for (job_id, path) in stale {
            self.lock().remove(&job_id);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(job_id = %job_id, "Scratch swept");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "Scratch sweep failed"),
            }
        }

        removed += self.sweep_orphans();
        removed
    }

    /// Removes unregistered directories under the root older than the age
    /// limit.
    fn sweep_orphans(&self) -> usize {
        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Scratch root scan failed");
                return 0;
            }
        };

        let registered: HashSet<PathBuf> = self.lock().values().map(|e| e.path.clone()).collect();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || registered.contains(&path) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(crate::time::system_time_to_instant)
                .map(|mtime| mtime.elapsed() > self.max_age)
                .unwrap_or(false);
            if old_enough {
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Orphan scratch swept");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Orphan sweep failed"),
                }
            }
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, ScratchEntry>> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ScratchSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchSpace")
            .field("root", &self.root)
            .field("registered", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch(max_age: Duration) -> (TempDir, ScratchSpace) {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchSpace::new(dir.path().join("scratch"), max_age).unwrap();
        (dir, scratch)
    }

    #[test]
    fn test_allocate_creates_directory() {
        let (_dir, scratch) = scratch(Duration::from_secs(60));
        let job_id = JobId::new("job-a");

        let path = scratch.allocate(&job_id).unwrap();
        assert!(path.is_dir());
        assert!(path.starts_with(scratch.root()));
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let (_dir, scratch) = scratch(Duration::from_secs(60));
        let job_id = JobId::new("job-a");

        let path = scratch.allocate(&job_id).unwrap();
        scratch.cleanup(&job_id);
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (_dir, scratch) = scratch(Duration::from_secs(60));
        let job_id = JobId::new("job-a");

        scratch.allocate(&job_id).unwrap();
        scratch.cleanup(&job_id);
        scratch.cleanup(&job_id); // no panic, no error
    }

    #[test]
    fn test_sweep_reclaims_inactive_jobs() {
        let (_dir, scratch) = scratch(Duration::from_secs(3_600));
        let gone = JobId::new("job-gone");
        let live = JobId::new("job-live");

        let gone_path = scratch.allocate(&gone).unwrap();
        let live_path = scratch.allocate(&live).unwrap();

        let active: HashSet<JobId> = [live.clone()].into_iter().collect();
        let removed = scratch.sweep(&active);

        assert_eq!(removed, 1);
        assert!(!gone_path.exists());
        assert!(live_path.exists());
    }

    #[test]
    fn test_sweep_reclaims_aged_out_jobs() {
        let (_dir, scratch) = scratch(Duration::ZERO);
        let job_id = JobId::new("job-old");
        let path = scratch.allocate(&job_id).unwrap();

        // Even active jobs age out at max_age zero.
        let active: HashSet<JobId> = [job_id.clone()].into_iter().collect();
        std::thread::sleep(Duration::from_millis(5));
        let removed = scratch.sweep(&active);

        assert_eq!(removed, 1);
        assert!(!path.exists());
    }
}
