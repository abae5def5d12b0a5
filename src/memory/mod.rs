//! Memory pressure monitoring.
//!
//! The monitor samples process memory on a fixed interval, classifies the
//! current usage against the configured budget into a four-level pressure
//! state, and broadcasts transitions on a `watch` channel. The resource
//! pool is the only reader: it pauses intake on emergency and resumes once
//! pressure returns to normal.

mod monitor;
mod state;

pub use monitor::{MemoryMonitor, MemorySampler, ProcStatusSampler};
pub use state::{
    MemorySample, MemoryState, PressureLevel, CRITICAL_RATIO, EMERGENCY_RATIO, MAX_SAMPLE_HISTORY,
    WARNING_RATIO,
};
