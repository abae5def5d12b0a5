//! Admission control for job execution resources.
//!
//! The resource pool is the gate between "queued" and "executing": it caps
//! concurrent jobs and concurrent large-payload jobs, reserves per-job
//! scratch space, and pauses intake entirely while memory pressure is at
//! emergency. Saturated or paused acquisition requests queue internally in
//! FIFO order rather than being rejected; callers simply wait until a slot
//! frees or the pool shuts down.

#[allow(clippy::module_inception)]
mod pool;
mod scratch;

pub use pool::{
    AdmissionError, AdmissionTicket, PoolConfig, ResourcePool, SlotClass,
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_LARGE_FILE_CONCURRENT,
};
pub use scratch::{ScratchSpace, DEFAULT_SCRATCH_MAX_AGE_SECS};
