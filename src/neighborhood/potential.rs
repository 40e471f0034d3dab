use std::collections::VecDeque;
use std::time::Instant;

use float_ord::FloatOrd;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{ensure_lp_solution, NeighborhoodStrategy};
use crate::hierarchy::{Duals, Level};
use crate::lp::{BasisStatus, TransportLpSolver};
use crate::plan::{Path, TransportPlan};

/// Searches the whole target hierarchy for arcs with a reduced cost of at most
/// `threshold` times their cost, pruning subtrees with the pi bounds of their
/// roots, and re-solves over those arcs plus the basis of the previous solve.
///
/// `sort` keeps the `n_add` arcs with the smallest reduced cost instead of the
/// first ones found, `expand` keeps every previous arc instead of only the basic
/// ones. Iterates until the solver needs no pivot or the cost improves by no more
/// than `tolerance` relative to its previous value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialNeighborhood {
    pub threshold: f64,
    pub tolerance: f64,
    pub sort: bool,
    pub expand: bool,
    pub iterations: usize,
    pub n_add: usize,
}

impl Default for PotentialNeighborhood {
    fn default() -> Self {
        PotentialNeighborhood {
            threshold: 0.0,
            tolerance: 0.0,
            sort: false,
            expand: false,
            iterations: 1,
            n_add: 1_000_000,
        }
    }
}

impl PotentialNeighborhood {
    pub fn new(threshold: f64, iterations: usize) -> Self {
        PotentialNeighborhood {
            threshold,
            iterations,
            ..Default::default()
        }
    }

    /// Arcs between `source` and `target` whose reduced cost is at most `threshold`
    /// times their cost, with that reduced cost. Expects the pi bounds of both
    /// hierarchies to enclose the potentials at the two levels.
    pub(crate) fn reduced_cost_arcs(
        &self,
        source: Level<'_>,
        target: Level<'_>,
        duals: &Duals,
        p: f64,
    ) -> Vec<(Path, f64)> {
        let hierarchy = target.hierarchy();
        let mut arcs = Vec::new();
        let mut queue = VecDeque::new();

        for from in source.indices() {
            let from_node = source.node(from);
            let pi_from = duals.source.level(source.scale())[from].pi_max;
            queue.extend(target.root().indices().map(|t| (0, t)));

            while let Some((scale, to)) = queue.pop_front() {
                let node = hierarchy.node(scale, to);
                let cost = from_node.distance(node);
                let (nearest, farthest) = if scale < target.scale() {
                    (cost - node.radius, cost + node.radius)
                } else {
                    (cost, cost)
                };
                let rc = nearest.max(0.0).powf(p) - pi_from + duals.target.level(scale)[to].pi_min;
                if rc > self.threshold * farthest.powf(p) {
                    continue;
                }
                if scale == target.scale() {
                    arcs.push((Path::new(from, to, from_node.transport_cost(node, p)), rc));
                } else {
                    queue.extend(node.children.iter().map(|&c| (scale + 1, c)));
                }
            }

            if arcs.len() > self.n_add {
                debug!("potential search stopped early with {} arcs", arcs.len());
                break;
            }
        }

        if self.sort {
            arcs.sort_by_key(|&(_, rc)| FloatOrd(rc));
            arcs.truncate(self.n_add);
        }
        arcs
    }
}

impl NeighborhoodStrategy for PotentialNeighborhood {
    fn solve_neighborhood<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        plan: &mut TransportPlan<'h>,
        _candidates: &TransportPlan<'h>,
        duals: &mut Duals,
        p: f64,
    ) {
        ensure_lp_solution(solver, plan, duals, p);
        let (source, target) = (plan.source, plan.target);

        for _ in 0..self.iterations {
            let t1 = Instant::now();
            solver.set_potentials(plan, duals);
            duals.source.propagate_bounds(source.hierarchy(), source.scale());
            duals.target.propagate_bounds(target.hierarchy(), target.scale());

            let arcs = self.reduced_cost_arcs(source, target, duals, p);
            let mut refined = TransportPlan::new(source, target);
            for &(path, _) in arcs.iter() {
                refined.add_path(path);
            }
            let mut column_status = vec![BasisStatus::Lower; refined.n_columns()];
            for path in plan.iter() {
                let status = solver.column_status(path.index);
                if status == BasisStatus::Basic {
                    match refined.path(path.from, path.to) {
                        Some(kept) => column_status[kept.index] = BasisStatus::Basic,
                        None => {
                            refined.add_path(*path);
                            column_status.push(BasisStatus::Basic);
                        }
                    }
                } else if self.expand && !refined.has_path(path.from, path.to) {
                    refined.add_path(*path);
                    column_status.push(BasisStatus::Lower);
                }
            }
            let row_status: Vec<_> = (0..solver.n_rows()).map(|r| solver.row_status(r)).collect();
            trace!(
                "potential: {} arcs below threshold, {} arcs in refined plan",
                arcs.len(),
                refined.n_paths()
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

            let previous_cost = plan.cost;
            *plan = refined;
            if solver.iteration_count() == 0 || previous_cost - plan.cost <= self.tolerance * previous_cost {
                break;
            }
        }
    }
}
