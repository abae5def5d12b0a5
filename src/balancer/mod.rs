//! Load-balanced job-to-worker assignment.
//!
//! The balancer is stateless with respect to the worker table: it ranks an
//! immutable snapshot of worker metrics, restricted to the target tier, and
//! never reaches into the cluster manager's state. Its only mutable state
//! is the per-tier round-robin rotation pointer.
//!
//! Three ranking strategies are available, chosen at construction time; the
//! periodic redistribution check reports a scale recommendation for the
//! cluster manager to act on—the balancer never changes worker count
//! itself.

#[allow(clippy::module_inception)]
mod balancer;
mod redistribution;
mod snapshot;
mod strategy;

pub use balancer::LoadBalancer;
pub use redistribution::{
    evaluate_load, ScaleRecommendation, OVERLOAD_AVG_PROCESSING, OVERLOAD_JOB_RUNTIME,
    RECENT_ERROR_WINDOW, UNDERLOAD_IDLE_TIME, UNDERLOAD_MAX_COMPLETED,
};
pub use snapshot::WorkerSnapshot;
pub use strategy::Strategy;
