//! Tiered job backlogs.
//!
//! One ordered backlog per tier. Classification applies two rules in order:
//! payload size above the large-file threshold routes to the large-file tier
//! regardless of plan; otherwise the caller's plan maps to premium or normal.
//!
//! Cross-tier selection is arbitrated by whichever component asks (the
//! cluster manager and load balancer), not by this module: premium tiers are
//! serviced preferentially by dedicating more workers, never by starving
//! other tiers.

mod backlog;
mod manager;
mod stats;
mod tier;

pub use backlog::{QueuedJob, TierBacklog};
pub use manager::QueueManager;
pub use stats::{QueueCounters, QueueStats, TierStats};
pub use tier::{classify, priority_for, Tier, PRIORITY_BULK_LARGE, PRIORITY_NORMAL, PRIORITY_PREMIUM};
