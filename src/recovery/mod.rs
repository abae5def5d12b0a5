//! Failure recovery: heartbeats, retries, backoff, and crash recovery.
//!
//! The [`FailureRecoveryManager`] tracks worker heartbeats and in-flight
//! jobs, computes retry eligibility and jittered exponential backoff, and
//! escalates exhausted jobs to permanent failure. Backoff timers live in a
//! single delay queue driven by one clock, shared with the periodic health
//! check and cleanup sweeps, instead of many independent interval timers.
//!
//! The [`RecoveryCoordinator`] is the integration point: it wires the
//! queue, cluster, balancer, and recovery manager together in one event
//! loop, persists lifecycle transitions best-effort, republishes events,
//! and re-submits jobs found mid-flight in the durable store after a
//! restart.

pub mod backoff;
mod coordinator;
mod delay_queue;
mod manager;
mod watchdog;

pub use coordinator::{RecoveryCoordinator, SubmittedJob};
pub use delay_queue::DelayQueue;
pub use manager::{
    FailureDisposition, FailureRecoveryManager, PendingRetry, RecoveryGauges, RecoveryStats,
    WorkerFailure,
};
pub use watchdog::{StallWatchdog, STALL_DETECTION_THRESHOLD_MS, STALL_WATCHDOG_INTERVAL_SECS};
