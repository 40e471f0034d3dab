pub mod capacity;
pub mod iterated_capacity;
pub mod max_entropy;
pub mod neighborhood;
pub mod randomized;
pub mod sinkhorn;

pub use capacity::{Capacity, CapacityPropagation};
pub use iterated_capacity::{IteratedCapacity, IteratedCapacityPropagation};
pub use max_entropy::MaxEntropyPropagation;
pub use neighborhood::{AlternateSolutions, NeighborhoodPropagation, NoAlternates};
pub use randomized::{Randomized, RandomizedPropagation};
pub use sinkhorn::SinkhornPropagation;

use crate::hierarchy::{Duals, Level, NodeIndex};
use crate::lp::TransportLpSolver;
use crate::plan::{Path, TransportPlan, TransportPlanSolutions};

/// Produces the first plan at a new pair of levels from the solutions at the
/// previous pair. Without previous solutions the levels are the first ones solved.
pub trait PropagationStrategy {
    #[allow(clippy::too_many_arguments)]
    fn propagate<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        last_scale: bool,
    ) -> TransportPlanSolutions<'h>;
}

impl<P> PropagationStrategy for Box<P>
where
    P: PropagationStrategy + ?Sized,
{
    fn propagate<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        last_scale: bool,
    ) -> TransportPlanSolutions<'h> {
        P::propagate(self, solver, source, target, previous, duals, p, last_scale)
    }
}

/// Adds every pair of successors of `from` and `to` to `plan`. The arcs that were
/// not yet part of the plan are returned in insertion order.
pub(crate) fn add_successor_pairs<'h>(
    plan: &mut TransportPlan<'h>,
    previous_source: &Level<'h>,
    previous_target: &Level<'h>,
    from: NodeIndex,
    to: NodeIndex,
    p: f64,
) -> Vec<Path> {
    let targets = previous_target.successors(to, &plan.target);
    let mut added = Vec::new();
    for f in previous_source.successors(from, &plan.source) {
        for &t in targets.iter() {
            if !plan.has_path(f, t) {
                plan.add(f, t, p);
                if let Some(path) = plan.path(f, t) {
                    added.push(*path);
                }
            }
        }
    }
    added
}
