//! The load balancer.

use super::snapshot::WorkerSnapshot;
use super::strategy::Strategy;
use crate::cluster::WorkerId;
use crate::queue::Tier;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Picks the best worker for a tier from a metrics snapshot.
///
/// The only mutable state is the per-tier rotation pointer used by the
/// weighted round-robin strategy; everything else is computed per call from
/// the snapshot the cluster manager hands over.
pub struct LoadBalancer {
    strategy: Strategy,
    rotation: HashMap<Tier, usize>,
}

impl LoadBalancer {
    /// Creates a balancer with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            rotation: HashMap::new(),
        }
    }

    /// Returns the configured strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Selects a worker for `tier` from the snapshot.
    ///
    /// Only assignable workers of the target tier are considered: status
    /// idle or processing, below capacity. Returns `None` when no worker
    /// qualifies.
    pub fn select_worker(
        &mut self,
        tier: Tier,
        snapshots: &[WorkerSnapshot],
    ) -> Option<WorkerId> {
        let candidates: Vec<WorkerSnapshot> = snapshots
            .iter()
            .filter(|s| s.tier == tier && s.is_assignable())
            .cloned()
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let rotation = self.rotation.entry(tier).or_insert(0);
        let pick = self.strategy.pick(&candidates, *rotation, Instant::now())?;
        if self.strategy == Strategy::WeightedRoundRobin {
            *rotation = rotation.wrapping_add(1);
        }

        let selected = candidates[pick].id.clone();
        debug!(
            tier = %tier,
            worker = %selected,
            candidates = candidates.len(),
            strategy = %self.strategy,
            "Worker selected"
        );
        Some(selected)
    }

    /// Resets the rotation pointer for one tier.
    ///
    /// Called after a worker in the tier is replaced, so the rotation does
    /// not keep favoring a stale position.
    pub fn reset_rotation(&mut self, tier: Tier) {
        self.rotation.insert(tier, 0);
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.strategy)
            .finish()
    }
}
