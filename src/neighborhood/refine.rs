use std::time::Instant;

use log::trace;
use serde::{Deserialize, Serialize};

use super::{ensure_lp_solution, reduced_cost, NeighborhoodStrategy};
use crate::hierarchy::Duals;
use crate::lp::{BasisStatus, TransportLpSolver};
use crate::plan::TransportPlan;

/// Replaces the plan by its used arcs plus the arcs around them with
/// non-positive reduced cost, and re-solves warm started from the previous basis.
/// Repeats while the cost changes, at most `iterations` times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineNeighborhood {
    pub expansion_factor: f64,
    pub tolerance: f64,
    pub iterations: usize,
}

impl Default for RefineNeighborhood {
    fn default() -> Self {
        RefineNeighborhood {
            expansion_factor: 1.0,
            tolerance: 0.0,
            iterations: 1,
        }
    }
}

impl RefineNeighborhood {
    pub fn new(expansion_factor: f64, tolerance: f64, iterations: usize) -> Self {
        RefineNeighborhood {
            expansion_factor,
            tolerance,
            iterations,
        }
    }

    fn refined_plan<'h>(&self, plan: &TransportPlan<'h>, duals: &Duals, p: f64) -> TransportPlan<'h> {
        let (source, target) = (plan.source, plan.target);
        let mut refined = TransportPlan::new(source, target);
        for path in plan.positive() {
            refined.add_path(*path);
        }

        for path in plan.positive() {
            let r = (target.local_node_radius(path.to) + source.local_node_radius(path.from))
                * self.expansion_factor;
            let from = source.neighborhood(path.from, r);
            let to = target.neighborhood(path.to, r);
            for &f in from.iter() {
                for &t in to.iter() {
                    if refined.has_path(f, t) {
                        continue;
                    }
                    let cost = source.node(f).transport_cost(target.node(t), p);
                    if reduced_cost(duals, &source, &target, f, t, cost) <= 0.0 {
                        refined.add(f, t, p);
                    }
                }
            }
        }
        refined
    }
}

impl NeighborhoodStrategy for RefineNeighborhood {
    fn solve_neighborhood<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        plan: &mut TransportPlan<'h>,
        _candidates: &TransportPlan<'h>,
        duals: &mut Duals,
        p: f64,
    ) {
        ensure_lp_solution(solver, plan, duals, p);

        let mut n_iter = self.iterations;
        let mut previous_cost = f64::NAN;
        while previous_cost != plan.cost && n_iter != 0 {
            n_iter -= 1;
            previous_cost = plan.cost;
            let t1 = Instant::now();
            solver.set_potentials(plan, duals);
            let mut refined = self.refined_plan(plan, duals, p);

            let mut column_status = vec![BasisStatus::Lower; refined.n_columns()];
            for path in plan.positive() {
                if let Some(kept) = refined.path(path.from, path.to) {
                    column_status[kept.index] = BasisStatus::Basic;
                }
            }
            let row_status: Vec<_> = (0..solver.n_rows()).map(|r| solver.row_status(r)).collect();
            trace!(
                "refine: {} of {} arcs kept or added",
                refined.n_paths(),
                plan.n_paths()
            );

            refined.time_solve = plan.time_solve;
            refined.time_propagate = plan.time_propagate;
            refined.time_refine = plan.time_refine;
            solver.create_lp(&refined);
            solver.setup_basis(&column_status, &row_status);
            let t2 = Instant::now();
            refined.time_refine += t2 - t1;
            solver.solve_lp();
            refined.time_solve += t2.elapsed();
            solver.store_lp(&mut refined, duals, p);

            let improvement = previous_cost - refined.cost;
            *plan = refined;
            if improvement <= self.tolerance * previous_cost {
                break;
            }
        }
    }
}
