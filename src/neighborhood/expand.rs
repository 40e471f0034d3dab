use std::time::Instant;

use log::trace;
use serde::{Deserialize, Serialize};

use super::{ensure_lp_solution, reduced_cost, NeighborhoodStrategy};
use crate::hierarchy::Duals;
use crate::lp::TransportLpSolver;
use crate::plan::TransportPlan;

/// Adds the arcs around the used candidate arcs that have non-positive reduced
/// cost as new columns of the current LP, `n_add` at a time, and re-solves.
///
/// The search radius around an arc is `expansion_factor` times the sum of the
/// local radii of its nodes. Each of the `iterations` rounds recomputes the
/// potentials; a round stops adding batches once the objective improves by no
/// more than `tolerance` times its previous value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandNeighborhood {
    pub expansion_factor: f64,
    pub tolerance: f64,
    pub iterations: usize,
    pub n_add: usize,
}

impl Default for ExpandNeighborhood {
    fn default() -> Self {
        ExpandNeighborhood {
            expansion_factor: 1.0,
            tolerance: 0.0,
            iterations: 1,
            n_add: 1_000_000,
        }
    }
}

impl ExpandNeighborhood {
    pub fn new(expansion_factor: f64, tolerance: f64, iterations: usize) -> Self {
        ExpandNeighborhood {
            expansion_factor,
            tolerance,
            iterations,
            ..Default::default()
        }
    }

    /// Arcs within the search radius of the used candidate arcs that are neither
    /// part of `plan` nor have positive reduced cost
    fn neighborhood_arcs<'h>(
        &self,
        plan: &TransportPlan<'h>,
        candidates: &TransportPlan<'h>,
        duals: &Duals,
        p: f64,
    ) -> TransportPlan<'h> {
        let (source, target) = (candidates.source, candidates.target);
        let mut found = TransportPlan::new(plan.source, plan.target);
        for path in candidates.positive() {
            let r = (target.local_node_radius(path.to) + source.local_node_radius(path.from))
                * self.expansion_factor;
            let from = source.neighborhood(path.from, r);
            let to = target.neighborhood(path.to, r);
            for &f in from.iter() {
                for &t in to.iter() {
                    if plan.has_path(f, t) || found.has_path(f, t) {
                        continue;
                    }
                    let cost = source.node(f).transport_cost(target.node(t), p);
                    if reduced_cost(duals, &source, &target, f, t, cost) <= 0.0 {
                        found.add(f, t, p);
                    }
                }
            }
        }
        found
    }
}

impl NeighborhoodStrategy for ExpandNeighborhood {
    fn solve_neighborhood<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        plan: &mut TransportPlan<'h>,
        candidates: &TransportPlan<'h>,
        duals: &mut Duals,
        p: f64,
    ) {
        ensure_lp_solution(solver, plan, duals, p);

        let mut outer_added = 1;
        let mut n_iter = self.iterations;
        while outer_added != 0 && n_iter != 0 {
            n_iter -= 1;
            let t1 = Instant::now();
            solver.set_potentials(plan, duals);
            let mut found = self.neighborhood_arcs(plan, candidates, duals, p);
            outer_added = found.n_paths();
            plan.time_refine += t1.elapsed();
            trace!("expand: {} arcs with non-positive reduced cost", outer_added);

            let mut previous = solver.objective_value();
            while !found.is_empty() {
                let t2 = Instant::now();
                for mut path in found.take_first(self.n_add) {
                    path.index = plan.add_path(path);
                    solver.add_path_column(&path);
                }
                let t3 = Instant::now();
                solver.solve_lp();
                let objective = solver.objective_value();
                plan.time_refine += t3 - t2;
                plan.time_solve += t3.elapsed();
                if previous - objective <= self.tolerance * previous {
                    break;
                }
                previous = objective;
            }
            solver.store_lp(plan, duals, p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, NodeIndex};
    use ndarray::array;

    #[test]
    fn expansion_recovers_the_optimum() {
        let mut a = Hierarchy::from_points(&array![[0.0], [1.0]], Some(&[0.4, 0.6]), None).unwrap();
        let mut b = Hierarchy::from_points(&array![[0.0], [1.0]], Some(&[0.4, 0.6]), None).unwrap();
        a.normalize(true).unwrap();
        b.normalize(true).unwrap();
        let mut duals = Duals::new(&a, &b);
        let mut solver = TransportLpSolver::network_simplex();
        let (i, j) = (NodeIndex::from(0), NodeIndex::from(1));

        let mut plan = TransportPlan::new(a.finest(), b.finest());
        plan.add(i, j, 2.0);
        plan.add(j, i, 2.0);
        plan.add(j, j, 2.0);
        solver.solve(&mut plan, &mut duals, 2.0);
        assert!(plan.cost > 0.5);

        let candidates = plan.clone();
        let mut strategy = ExpandNeighborhood::new(2.0, 0.0, 5);
        strategy.solve_neighborhood(&mut solver, &mut plan, &candidates, &mut duals, 2.0);

        assert!(plan.has_path(i, i));
        assert!(plan.cost.abs() < 1e-6);
        assert!((plan.path(i, i).unwrap().w - 0.4).abs() < 1e-6);
    }
}
