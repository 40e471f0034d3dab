use std::time::Instant;

use log::{debug, trace};

use super::PropagationStrategy;
use crate::hierarchy::{Duals, Level};
use crate::lp::TransportLpSolver;
use crate::plan::{Path, SolveStatus, TransportPlan, TransportPlanSolutions};

/// Splits the weight of every previous arc over all pairs of its children, in
/// proportion to the product of the child masses. No LP is solved once a previous
/// solution exists, children inherit the potentials of their parents.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxEntropyPropagation;

impl PropagationStrategy for MaxEntropyPropagation {
    fn propagate<'h>(
        &mut self,
        solver: &mut TransportLpSolver,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        _last_scale: bool,
    ) -> TransportPlanSolutions<'h> {
        let previous = match previous {
            Some(previous) => &previous.primary,
            None => {
                let mut plan = TransportPlan::complete(source, target, p);
                debug!("solving complete problem with {} arcs", plan.n_paths());
                solver.solve(&mut plan, duals, p);
                return TransportPlanSolutions::new(plan);
            }
        };

        let start = Instant::now();
        let mut plan = TransportPlan::new(source, target);
        let mut objective = 0.0;
        for path in previous.iter() {
            let from = previous.source.successors(path.from, &source);
            let to = previous.target.successors(path.to, &target);
            let total: f64 = from
                .iter()
                .flat_map(|&f| to.iter().map(move |&t| source.node(f).mass * target.node(t).mass))
                .sum();
            for &f in from.iter() {
                for &t in to.iter() {
                    let (fnode, tnode) = (source.node(f), target.node(t));
                    let mut child = Path::new(f, t, fnode.transport_cost(tnode, p));
                    if total > 0.0 {
                        child.w = fnode.mass * tnode.mass * path.w / total;
                    }
                    objective += child.w * child.cost;
                    plan.add_path(child);
                }
            }
        }

        for (duals, previous_level, level) in [
            (&mut duals.source, previous.source, source),
            (&mut duals.target, previous.target, target),
        ] {
            let inherited: Vec<_> = previous_level
                .indices()
                .flat_map(|i| {
                    let pi = duals.potential(previous_level.scale(), i);
                    previous_level
                        .successors(i, &level)
                        .into_iter()
                        .map(move |c| (c, pi))
                })
                .collect();
            let potentials = duals.level_mut(level.scale());
            for (c, pi) in inherited {
                potentials[c].potential = pi;
            }
        }

        plan.cost = objective.max(0.0).powf(1.0 / p);
        plan.status = SolveStatus::Interpolated;
        plan.time_propagate += start.elapsed();
        trace!("max entropy propagation: {}", plan);
        TransportPlanSolutions::new(plan)
    }
}
