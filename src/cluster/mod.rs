//! Worker cluster lifecycle management.
//!
//! The cluster manager owns the worker table and is the only component
//! permitted to mutate worker count and worker status. Workers themselves
//! are spawned tokio tasks that pull assignments from a channel, stamp
//! heartbeats, execute the extraction call behind the circuit breaker, and
//! report outcomes on an event channel—they never touch controller state.

mod manager;
mod worker;

pub use manager::{ClusterGauges, ClusterHealth, ClusterManager};
pub use worker::{
    Assignment, JobOutcome, WorkerEvent, WorkerId, WorkerRuntime, WorkerStats, WorkerStatus,
    DEFAULT_ASSIGNMENT_CHANNEL_CAPACITY,
};
