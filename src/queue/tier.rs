//! Tier classification and scheduling priority.

use crate::job::Plan;
use serde::{Deserialize, Serialize};

/// Base scheduling priority for the premium tier (lower dequeues first).
pub const PRIORITY_PREMIUM: i32 = 10;

/// Base scheduling priority for the normal tier.
pub const PRIORITY_NORMAL: i32 = 50;

/// Base scheduling priority for the large-file tier.
pub const PRIORITY_BULK_LARGE: i32 = 80;

/// A named priority class of jobs with its own backlog and worker affinity.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Paid-plan jobs under the large-file threshold.
    Premium,
    /// Standard-plan jobs under the large-file threshold.
    Normal,
    /// Any job at or above the large-file threshold, regardless of plan.
    BulkLarge,
}

impl Tier {
    /// All tiers in servicing order (used when iterating backlogs).
    pub const ALL: [Tier; 3] = [Tier::Premium, Tier::Normal, Tier::BulkLarge];

    /// Stable index for per-tier tables.
    pub fn index(&self) -> usize {
        match self {
            Self::Premium => 0,
            Self::Normal => 1,
            Self::BulkLarge => 2,
        }
    }

    /// Returns a string representation of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Normal => "normal",
            Self::BulkLarge => "bulk-large",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifies a job into a tier.
///
/// Rule order matters: the size rule wins over the plan rule, so a premium
/// caller submitting a large payload still lands in the large-file tier.
pub fn classify(plan: Plan, size_bytes: u64, large_threshold_bytes: u64) -> Tier {
    if size_bytes >= large_threshold_bytes {
        return Tier::BulkLarge;
    }
    match plan {
        Plan::Premium => Tier::Premium,
        Plan::Standard => Tier::Normal,
    }
}

/// Computes the scheduling priority for a job (lower dequeues first).
///
/// Retried jobs get a modest boost that shrinks with repeated failure:
/// `base - retry_count / 2`. The formula is a tunable, not a contract;
/// it only affects ordering within one tier's backlog.
pub fn priority_for(tier: Tier, retry_count: u32) -> i32 {
    let base = match tier {
        Tier::Premium => PRIORITY_PREMIUM,
        Tier::Normal => PRIORITY_NORMAL,
        Tier::BulkLarge => PRIORITY_BULK_LARGE,
    };
    base - (retry_count / 2) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_classify_by_plan() {
        assert_eq!(classify(Plan::Premium, MB, 100 * MB), Tier::Premium);
        assert_eq!(classify(Plan::Standard, MB, 100 * MB), Tier::Normal);
    }

    #[test]
    fn test_classify_large_overrides_plan() {
        // Size rule wins regardless of plan.
        assert_eq!(classify(Plan::Premium, 100 * MB, 100 * MB), Tier::BulkLarge);
        assert_eq!(classify(Plan::Standard, 200 * MB, 100 * MB), Tier::BulkLarge);
    }

    #[test]
    fn test_classify_at_threshold_is_large() {
        assert_eq!(classify(Plan::Premium, 50 * MB, 50 * MB), Tier::BulkLarge);
        assert_eq!(classify(Plan::Premium, 50 * MB - 1, 50 * MB), Tier::Premium);
    }

    #[test]
    fn test_priority_ordering_across_tiers() {
        assert!(priority_for(Tier::Premium, 0) < priority_for(Tier::Normal, 0));
        assert!(priority_for(Tier::Normal, 0) < priority_for(Tier::BulkLarge, 0));
    }

    #[test]
    fn test_retry_boost_shrinks_with_failures() {
        let fresh = priority_for(Tier::Normal, 0);
        assert_eq!(priority_for(Tier::Normal, 1), fresh);
        assert_eq!(priority_for(Tier::Normal, 2), fresh - 1);
        assert_eq!(priority_for(Tier::Normal, 3), fresh - 1);
        assert_eq!(priority_for(Tier::Normal, 4), fresh - 2);
    }

    #[test]
    fn test_tier_index_is_stable() {
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.index(), i);
        }
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(format!("{}", Tier::Premium), "premium");
        assert_eq!(format!("{}", Tier::BulkLarge), "bulk-large");
    }
}
