pub mod expand;
pub mod potential;
pub mod refine;

pub use expand::ExpandNeighborhood;
pub use potential::PotentialNeighborhood;
pub use refine::RefineNeighborhood;

use log::debug;

use crate::hierarchy::{Duals, Level, NodeIndex};
use crate::lp::TransportLpSolver;
use crate::plan::TransportPlan;

/// Improves a plan at a fixed pair of levels by adding arcs the duals of the
/// current solution mark as promising, and re-solving.
///
/// `plan` must be the problem currently held by `solver`, unless its weights did
/// not come from the LP solver at all. `candidates` holds the arcs whose
/// surroundings are searched.
pub trait NeighborhoodStrategy {
    fn solve_neighborhood<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        plan: &mut TransportPlan<'h>,
        candidates: &TransportPlan<'h>,
        duals: &mut Duals,
        p: f64,
    );
}

impl<N> NeighborhoodStrategy for Box<N>
where
    N: NeighborhoodStrategy + ?Sized,
{
    fn solve_neighborhood<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        plan: &mut TransportPlan<'h>,
        candidates: &TransportPlan<'h>,
        duals: &mut Duals,
        p: f64,
    ) {
        N::solve_neighborhood(self, solver, plan, candidates, duals, p)
    }
}

/// Solves the LP over the arcs of `plan` if its weights were produced without the
/// LP solver, so that the solver holds the plan and its duals are available
pub(crate) fn ensure_lp_solution(solver: &mut TransportLpSolver, plan: &mut TransportPlan, duals: &mut Duals, p: f64) {
    if !plan.status.is_lp() {
        debug!("plan has {:?} weights, solving its lp first", plan.status);
        solver.solve(plan, duals, p);
    }
}

/// Reduced cost `cost - pi_from + pi_to` of an arc under the current potentials
pub(crate) fn reduced_cost(duals: &Duals, source: &Level, target: &Level, from: NodeIndex, to: NodeIndex, cost: f64) -> f64 {
    cost - duals.source.potential(source.scale(), from) + duals.target.potential(target.scale(), to)
}
