//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use super::defaults::*;
use crate::breaker::BreakerConfig;
use crate::pool::PoolConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Worker pool sizing and scaling.
    pub cluster: ClusterSettings,
    /// Admission control caps and scratch space.
    pub pool: PoolSettings,
    /// Memory budget and sampling.
    pub memory: MemorySettings,
    /// Circuit breaker around the extraction engine.
    pub breaker: BreakerSettings,
    /// Retry and backoff behavior.
    pub retry: RetrySettings,
    /// Heartbeats, timeouts, and the recovery clock.
    pub health: HealthSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Worker cluster configuration.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Lower bound on worker count.
    pub min_workers: usize,
    /// Upper bound on worker count.
    pub max_workers: usize,
    /// Backlog depth that triggers a scale-up.
    pub scale_up_threshold: usize,
    /// Backlog depth below which an idle worker is retired.
    pub scale_down_threshold: usize,
    /// Concurrent jobs one worker will accept.
    pub worker_capacity: usize,
    /// Interval between scaling evaluations.
    pub scale_interval: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            scale_up_threshold: DEFAULT_SCALE_UP_THRESHOLD,
            scale_down_threshold: DEFAULT_SCALE_DOWN_THRESHOLD,
            worker_capacity: DEFAULT_WORKER_CAPACITY,
            scale_interval: Duration::from_secs(DEFAULT_SCALE_INTERVAL_SECS),
        }
    }
}

/// Resource pool configuration.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Concurrent normal-class jobs.
    pub max_concurrent_jobs: usize,
    /// Concurrent large-file-class jobs.
    pub max_large_file_concurrent: usize,
    /// Payload size in megabytes that classifies a job as large.
    pub large_file_threshold_mb: u64,
    /// Scratch directory root (None disables scratch space).
    pub scratch_dir: Option<PathBuf>,
    /// Age at which scratch directories are reclaimed.
    pub scratch_max_age: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_large_file_concurrent: DEFAULT_MAX_LARGE_FILE_CONCURRENT,
            large_file_threshold_mb: DEFAULT_LARGE_FILE_THRESHOLD_MB,
            scratch_dir: None,
            scratch_max_age: Duration::from_secs(DEFAULT_SCRATCH_MAX_AGE_SECS),
        }
    }
}

impl PoolSettings {
    /// Payload size threshold in bytes.
    pub fn large_file_threshold_bytes(&self) -> u64 {
        self.large_file_threshold_mb * 1024 * 1024
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs,
            max_large_file_concurrent: settings.max_large_file_concurrent,
            large_file_threshold_bytes: settings.large_file_threshold_bytes(),
            scratch_root: settings.scratch_dir.clone(),
            scratch_max_age: settings.scratch_max_age,
        }
    }
}

/// Memory monitoring configuration.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Memory budget in megabytes; pressure ratios are relative to this.
    pub max_memory_usage_mb: u64,
    /// Interval between samples.
    pub sample_interval: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_memory_usage_mb: DEFAULT_MAX_MEMORY_USAGE_MB,
            sample_interval: Duration::from_secs(DEFAULT_MEMORY_SAMPLE_INTERVAL_SECS),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub circuit_timeout: Duration,
    /// Probe calls allowed while half-open.
    pub half_open_max_calls: u32,
    /// Interval between counter decay ticks.
    pub monitor_interval: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_timeout: Duration::from_millis(DEFAULT_CIRCUIT_TIMEOUT_MS),
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            monitor_interval: Duration::from_secs(DEFAULT_BREAKER_MONITOR_INTERVAL_SECS),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            open_timeout: settings.circuit_timeout,
            half_open_max_calls: settings.half_open_max_calls,
        }
    }
}

/// Retry and backoff configuration.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Retry attempts before a job permanently fails.
    pub max_retries: u32,
    /// Backoff for the first retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

/// Health checking and recovery clock configuration.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Interval between worker health checks.
    pub worker_health_check_interval: Duration,
    /// Interval between worker heartbeats.
    pub heartbeat_interval: Duration,
    /// Heartbeat silence before a worker is considered failed.
    pub heartbeat_stale_after: Duration,
    /// Hard per-job timeout; exceeding it is treated as worker failure.
    pub job_timeout: Duration,
    /// Resolution of the recovery manager's shared clock.
    pub clock_resolution: Duration,
    /// Crash-recovery lookback window.
    pub recovery_window: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            worker_health_check_interval: Duration::from_millis(
                DEFAULT_WORKER_HEALTH_CHECK_INTERVAL_MS,
            ),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_stale_after: Duration::from_millis(DEFAULT_HEARTBEAT_STALE_AFTER_MS),
            job_timeout: Duration::from_millis(DEFAULT_JOB_TIMEOUT_MS),
            clock_resolution: Duration::from_millis(DEFAULT_CLOCK_RESOLUTION_MS),
            recovery_window: Duration::from_secs(DEFAULT_RECOVERY_WINDOW_SECS),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub dir: String,
    /// Log file name.
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: crate::logging::default_log_dir().to_string(),
            file: crate::logging::default_log_file().to_string(),
        }
    }
}
