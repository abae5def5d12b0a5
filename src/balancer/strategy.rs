//! Worker ranking strategies.

use super::snapshot::WorkerSnapshot;
use std::time::{Duration, Instant};

/// Base weight every candidate starts with.
const WEIGHT_BASE: i64 = 100;

/// Penalty per already-assigned job.
const ASSIGNED_JOB_PENALTY: i64 = 25;

/// Heavy penalty for an error within [`ERROR_WINDOW`].
const RECENT_ERROR_PENALTY: i64 = 50;

/// Window in which an error is considered recent.
const ERROR_WINDOW: Duration = Duration::from_secs(300);

/// Bonus for idle workers.
const IDLE_BONUS: i64 = 20;

/// Candidates within this ratio of the top weight join the round-robin set.
const TOP_WEIGHT_RATIO: f64 = 0.8;

/// Worker ranking strategy, selected at construction time.
///
/// A closed set of variants behind one selection entry point; no runtime
/// string dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Weight candidates, then round-robin among those within 80% of the
    /// top weight (per-tier rotation pointer).
    #[default]
    WeightedRoundRobin,

    /// Prefer workers with no current job, tie-broken by lower average
    /// processing time.
    LeastLoaded,

    /// Prefer idle workers with the lowest average processing time; fall
    /// back to least-loaded if none are idle.
    FastestResponse,
}

impl Strategy {
    /// Returns a string representation of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightedRoundRobin => "weighted-round-robin",
            Self::LeastLoaded => "least-loaded",
            Self::FastestResponse => "fastest-response",
        }
    }

    /// Picks a worker index from assignable candidates.
    ///
    /// `rotation` is the tier's round-robin pointer, used only by the
    /// weighted strategy. Candidates must already be filtered to assignable
    /// workers of the target tier.
    pub(super) fn pick(
        &self,
        candidates: &[WorkerSnapshot],
        rotation: usize,
        now: Instant,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            Self::WeightedRoundRobin => Self::pick_weighted(candidates, rotation, now),
            Self::LeastLoaded => Self::pick_least_loaded(candidates),
            Self::FastestResponse => Self::pick_fastest(candidates),
        }
    }

    /// Computes the scheduling weight of one candidate.
    fn weight(snapshot: &WorkerSnapshot, now: Instant) -> i64 {
        let mut weight = WEIGHT_BASE;
        weight -= snapshot.current_jobs as i64 * ASSIGNED_JOB_PENALTY;
        // Penalize proportionally to average processing time (1 point per
        // second of average).
        weight -= (snapshot.avg_processing_ms / 1000) as i64;
        if snapshot.errored_within(ERROR_WINDOW, now) {
            weight -= RECENT_ERROR_PENALTY;
        }
        if snapshot.status == crate::cluster::WorkerStatus::Idle {
            weight += IDLE_BONUS;
        }
        weight
    }

    fn pick_weighted(candidates: &[WorkerSnapshot], rotation: usize, now: Instant) -> Option<usize> {
        let weights: Vec<i64> = candidates.iter().map(|c| Self::weight(c, now)).collect();
        let top = *weights.iter().max()?;
        // min(top) keeps the strongest candidate eligible even when all
        // weights are negative.
        let cutoff = ((top as f64 * TOP_WEIGHT_RATIO).floor() as i64).min(top);

        let eligible: Vec<usize> = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w >= cutoff)
            .map(|(i, _)| i)
            .collect();

        let pick = eligible[rotation % eligible.len()];
        Some(pick)
    }

    fn pick_least_loaded(candidates: &[WorkerSnapshot]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.current_jobs, c.avg_processing_ms))
            .map(|(i, _)| i)
    }

    fn pick_fastest(candidates: &[WorkerSnapshot]) -> Option<usize> {
        let fastest_idle = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == crate::cluster::WorkerStatus::Idle)
            .min_by_key(|(_, c)| c.avg_processing_ms)
            .map(|(i, _)| i);

        fastest_idle.or_else(|| Self::pick_least_loaded(candidates))
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
