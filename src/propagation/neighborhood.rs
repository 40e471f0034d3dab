use std::time::Instant;

use log::{debug, trace};

use super::{add_successor_pairs, PropagationStrategy};
use crate::hierarchy::{Duals, Level};
use crate::lp::TransportLpSolver;
use crate::plan::{TransportPlan, TransportPlanSolutions};

/// Generator of alternative solutions at the previous scale, run before the
/// primary solution is propagated. Alternatives are appended to `previous`.
pub trait AlternateSolutions {
    fn compute_alternate_solutions(
        &mut self,
        _solver: &mut TransportLpSolver,
        _previous: &mut TransportPlanSolutions<'_>,
        _p: f64,
        _last_scale: bool,
    ) {
    }
}

/// Computes no alternatives
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlternates;

impl AlternateSolutions for NoAlternates {}

/// Propagation through the children of the previously used arcs.
///
/// At the first pair of levels every pair of nodes becomes an arc. Afterwards the
/// children of every arc with positive weight are connected and solved, then the
/// arcs around each used arc of the previous primary and alternative solutions are
/// added within `expansion_factor` times the local node radii, and the LP is
/// solved again from the first solution.
#[derive(Debug, Clone, Default)]
pub struct NeighborhoodPropagation<A = NoAlternates> {
    pub expansion_factor: f64,
    pub alternates: A,
}

impl NeighborhoodPropagation<NoAlternates> {
    pub fn new(expansion_factor: f64) -> Self {
        NeighborhoodPropagation {
            expansion_factor,
            alternates: NoAlternates,
        }
    }
}

impl<A> NeighborhoodPropagation<A> {
    pub fn with_alternates(expansion_factor: f64, alternates: A) -> Self {
        NeighborhoodPropagation {
            expansion_factor,
            alternates,
        }
    }

    /// Adds the children of the used arcs of `previous` to `plan`. With a positive
    /// `r_factor` the children of all node pairs around each arc are used. New
    /// arcs get a column in `solver` when one is given.
    fn ball_neighborhood<'h>(
        plan: &mut TransportPlan<'h>,
        previous: &TransportPlan<'h>,
        r_factor: f64,
        p: f64,
        mut solver: Option<&mut TransportLpSolver>,
    ) -> usize {
        let (source, target) = (previous.source, previous.target);
        let mut added = Vec::new();
        for path in previous.positive() {
            if r_factor > 0.0 {
                let from = source.neighborhood(path.from, source.node(path.from).local_radius * r_factor);
                let to = target.neighborhood(path.to, target.node(path.to).local_radius * r_factor);
                for &f in from.iter() {
                    for &t in to.iter() {
                        added.extend(add_successor_pairs(plan, &source, &target, f, t, p));
                    }
                }
            } else {
                added.extend(add_successor_pairs(plan, &source, &target, path.from, path.to, p));
            }
        }

        if let Some(solver) = solver.as_deref_mut() {
            for path in added.iter() {
                solver.add_path_column(path);
            }
        }
        added.len()
    }
}

impl<A> PropagationStrategy for NeighborhoodPropagation<A>
where
    A: AlternateSolutions,
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
        let previous = match previous {
            Some(previous) => previous,
            None => {
                let start = Instant::now();
                let mut plan = TransportPlan::complete(source, target, p);
                plan.time_propagate += start.elapsed();
                debug!("solving complete problem with {} arcs", plan.n_paths());
                solver.solve(&mut plan, duals, p);
                return TransportPlanSolutions::new(plan);
            }
        };

        self.alternates
            .compute_alternate_solutions(solver, previous, p, last_scale);

        let mut plan = TransportPlan::new(source, target);
        let t1 = Instant::now();
        let n_children = Self::ball_neighborhood(&mut plan, &previous.primary, 0.0, p, None);
        solver.create_lp(&plan);
        let t2 = Instant::now();
        solver.solve_lp();
        let t3 = Instant::now();

        let combined = previous.combined_paths();
        let n_expanded =
            Self::ball_neighborhood(&mut plan, &combined, self.expansion_factor, p, Some(solver));
        let t4 = Instant::now();
        solver.solve_lp();
        let t5 = Instant::now();

        plan.time_solve += (t3 - t2) + (t5 - t4);
        plan.time_propagate += (t2 - t1) + (t4 - t3);
        solver.store_lp(&mut plan, duals, p);
        trace!(
            "propagated {} child arcs and {} expanded arcs, cost {}",
            n_children,
            n_expanded,
            plan.cost
        );
        TransportPlanSolutions::new(plan)
    }
}
