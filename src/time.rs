//! Time-related utility functions.
//!
//! This module provides helpers for working with time types, particularly
//! conversions between persisted wall-clock timestamps and the monotonic
//! instants used for scheduling math during crash recovery.

use std::time::{Instant, SystemTime};

/// Convert a `SystemTime` to an `Instant`.
///
/// This is approximate since `Instant` doesn't have a fixed epoch.
/// The conversion calculates elapsed time from the `SystemTime` to now,
/// then subtracts that from the current `Instant`.
///
/// # Arguments
///
/// * `system_time` - The system time to convert
///
/// # Returns
///
/// `Some(Instant)` if the conversion succeeds, `None` if the resulting
/// instant would be before the process start (underflow).
pub fn system_time_to_instant(system_time: SystemTime) -> Option<Instant> {
    let now_system = SystemTime::now();
    let now_instant = Instant::now();

    match now_system.duration_since(system_time) {
        Ok(elapsed) => now_instant.checked_sub(elapsed),
        Err(_) => Some(now_instant), // Future time, use now
    }
}

/// Convert a `chrono::DateTime<Utc>` to an `Instant`.
///
/// Used when replaying job records from the durable store: record
/// timestamps are wall-clock, scheduling deadlines are monotonic.
pub fn datetime_to_instant(at: chrono::DateTime<chrono::Utc>) -> Option<Instant> {
    let system_time: SystemTime = at.into();
    system_time_to_instant(system_time)
}
