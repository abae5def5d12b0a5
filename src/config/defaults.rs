//! Default configuration values.

/// Minimum workers kept alive.
pub const DEFAULT_MIN_WORKERS: usize = 2;

/// Maximum workers the cluster will scale to.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Backlog depth that triggers a scale-up.
pub const DEFAULT_SCALE_UP_THRESHOLD: usize = 10;

/// Backlog depth below which the cluster scales down.
pub const DEFAULT_SCALE_DOWN_THRESHOLD: usize = 2;

/// Concurrent jobs one worker will accept.
pub const DEFAULT_WORKER_CAPACITY: usize = 1;

/// Seconds between scaling evaluations.
pub const DEFAULT_SCALE_INTERVAL_SECS: u64 = 15;

/// Concurrent normal-class jobs admitted by the pool.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;

/// Concurrent large-file-class jobs admitted by the pool.
pub const DEFAULT_MAX_LARGE_FILE_CONCURRENT: usize = 2;

/// Payload size in megabytes that classifies a job as large.
pub const DEFAULT_LARGE_FILE_THRESHOLD_MB: u64 = 100;

/// Seconds before the sweep reclaims a scratch directory.
pub const DEFAULT_SCRATCH_MAX_AGE_SECS: u64 = 3_600;

/// Memory budget in megabytes.
pub const DEFAULT_MAX_MEMORY_USAGE_MB: u64 = 4_096;

/// Seconds between memory samples.
pub const DEFAULT_MEMORY_SAMPLE_INTERVAL_SECS: u64 = 5;

/// Extraction failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Milliseconds the circuit stays open.
pub const DEFAULT_CIRCUIT_TIMEOUT_MS: u64 = 30_000;

/// Probe calls allowed while the circuit is half-open.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 4;

/// Seconds between circuit counter decay ticks.
pub const DEFAULT_BREAKER_MONITOR_INTERVAL_SECS: u64 = 60;

/// Retry attempts before a job permanently fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Milliseconds of backoff for the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Backoff ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Milliseconds between worker health checks.
pub const DEFAULT_WORKER_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

/// Milliseconds between worker heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// Milliseconds of heartbeat silence before a worker is considered failed.
pub const DEFAULT_HEARTBEAT_STALE_AFTER_MS: u64 = 15_000;

/// Hard per-job timeout in milliseconds.
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 300_000;

/// Resolution of the recovery manager's shared clock, in milliseconds.
pub const DEFAULT_CLOCK_RESOLUTION_MS: u64 = 250;

/// Crash-recovery lookback window in seconds.
pub const DEFAULT_RECOVERY_WINDOW_SECS: u64 = 3_600;
